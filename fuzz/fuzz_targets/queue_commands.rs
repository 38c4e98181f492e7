#![no_main]

use libfuzzer_sys::fuzz_target;
use tunedrop::model::Track;
use tunedrop::queue::PlaylistQueue;

fn track(idx: u8) -> Track {
    Track::placeholder(&format!("t{idx}"), format!("http://backend/files/t{idx}.mp3"))
}

fuzz_target!(|data: &[u8]| {
    let Some((&seed, ops)) = data.split_first() else {
        return;
    };
    let mut queue = PlaylistQueue::with_seed(u64::from(seed));

    for pair in ops.chunks(2) {
        let arg = pair.get(1).copied().unwrap_or_default() % 16;
        match pair[0] % 8 {
            0 => {
                queue.add(track(arg));
            }
            1 => {
                queue.activate_or_toggle(track(arg));
            }
            2 => {
                queue.remove(&format!("t{arg}"));
            }
            3 => {
                queue.next(arg % 2 == 0);
            }
            4 => {
                queue.prev(arg % 2 == 0);
            }
            5 => queue.set_playing(arg % 2 == 0),
            6 => queue.set_playlist((0..arg).map(|idx| track(idx % 5)).collect()),
            _ => {
                let before = queue.current_index();
                if queue.len() > 1 && queue.next(true) == before {
                    panic!("shuffle repeated the current entry");
                }
            }
        }

        assert_eq!(queue.current_index().is_some(), !queue.is_empty());
        assert!(queue.current_index().is_none_or(|idx| idx < queue.len()));
        assert!(!queue.is_playing() || !queue.is_empty());
        let mut keys: Vec<&str> = queue.tracks().iter().map(Track::identity_key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), queue.len());
    }
});

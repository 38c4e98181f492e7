use crate::backend::BackendApi;
use crate::error::{ClientError, Result};
use crate::model::Track;
use tracing::info;

/// Completed downloads as the backend lists them, newest first. Refetched on
/// demand and never cached across sessions.
#[derive(Debug, Default)]
pub struct TrackCatalog {
    tracks: Vec<Track>,
    loaded: bool,
}

impl TrackCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn refresh<B: BackendApi>(&mut self, backend: &B) -> Result<usize> {
        let response = backend.list().await?;
        let tracks = match response.status.as_str() {
            "success" => response.downloads,
            "empty" => Vec::new(),
            other => {
                return Err(ClientError::UnexpectedResponse(format!(
                    "list returned status {other}"
                )));
            }
        };

        self.tracks = tracks;
        self.loaded = true;
        info!(tracks = self.tracks.len(), "catalog refreshed");
        Ok(self.tracks.len())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|track| track.id == id)
    }

    pub fn search(&self, query: &str) -> Vec<&Track> {
        self.tracks
            .iter()
            .filter(|track| track.matches_query(query))
            .collect()
    }

    /// Drops `id` locally after the backend confirmed the removal.
    pub fn forget(&mut self, id: &str) -> bool {
        let before = self.tracks.len();
        self.tracks.retain(|track| track.id != id);
        self.tracks.len() != before
    }
}

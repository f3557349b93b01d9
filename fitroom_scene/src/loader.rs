//! Background asset decoding. Each request runs on its own named worker
//! thread; the outcome travels back over an mpsc channel and is pumped into
//! the engine on the frame tick. Superseded loads are not cancelled; their
//! results arrive with a stale generation and the engine discards them.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use thiserror::Error;

use fitroom_formats::Document;

use crate::engine::{LoadOutcome, LoadRequest, Slot};

#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("decoding {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },
}

pub struct AssetLoader {
    tx: Sender<LoadOutcome>,
    rx: Receiver<LoadOutcome>,
}

impl AssetLoader {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    /// Start a decode worker for the request. Never blocks.
    pub fn dispatch(&self, request: LoadRequest) {
        let tx = self.tx.clone();
        let name = match request.slot {
            Slot::Avatar => "fitroom-load-avatar",
            Slot::Garment => "fitroom-load-garment",
        };
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || decode_worker(request, tx))
            .expect("spawn asset decode thread");
    }

    /// Drain every completion that has arrived since the last pump.
    pub fn poll(&self) -> Vec<LoadOutcome> {
        self.rx.try_iter().collect()
    }

    /// Block until the next completion; `None` once every sender is gone.
    pub fn wait(&self) -> Option<LoadOutcome> {
        self.rx.recv().ok()
    }
}

impl Default for AssetLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_worker(request: LoadRequest, tx: Sender<LoadOutcome>) {
    log::debug!(
        "decoding {:?} asset {}",
        request.slot,
        request.source.display()
    );
    let result = Document::import(&request.source).map_err(|err| LoadError::Decode {
        path: request.source.clone(),
        message: format!("{err:#}"),
    });
    // The receiver disappearing just means the viewer is shutting down.
    let _ = tx.send(LoadOutcome {
        slot: request.slot,
        generation: request.generation,
        result,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_decode_reports_through_the_channel() {
        let loader = AssetLoader::new();
        loader.dispatch(LoadRequest {
            slot: Slot::Avatar,
            generation: 1,
            source: PathBuf::from("/definitely/not/here.glb"),
        });
        let outcome = loader.wait().expect("worker reported");
        assert_eq!(outcome.slot, Slot::Avatar);
        assert_eq!(outcome.generation, 1);
        let err = outcome.result.expect_err("missing file must fail");
        assert!(err.to_string().contains("not/here.glb"));
    }
}

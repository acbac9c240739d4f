use tokio::sync::mpsc;

use crate::core::errors::ApiError;

const DEFAULT_BUFFER: usize = 32;

/// Single-pass sequence of model output fragments.
///
/// Completion is the channel closing; an `Err` item is a terminal failure and
/// producers stop sending after it.
#[derive(Debug)]
pub struct FragmentStream {
    rx: mpsc::Receiver<Result<String, ApiError>>,
}

impl FragmentStream {
    pub fn channel() -> (mpsc::Sender<Result<String, ApiError>>, Self) {
        let (tx, rx) = mpsc::channel(DEFAULT_BUFFER);
        (tx, Self { rx })
    }

    pub fn from_receiver(rx: mpsc::Receiver<Result<String, ApiError>>) -> Self {
        Self { rx }
    }

    /// Pre-filled stream, mostly useful for fixed replies and test doubles.
    pub fn from_fragments(items: Vec<Result<String, ApiError>>) -> Self {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            if tx.try_send(item).is_err() {
                break;
            }
        }
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<Result<String, ApiError>> {
        self.rx.recv().await
    }

    /// Drain the stream into one string, stopping at the first error.
    pub async fn collect_text(mut self) -> Result<String, ApiError> {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            text.push_str(&item?);
        }
        Ok(text)
    }
}

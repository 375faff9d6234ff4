//! TCP input loop
//!
//! The input acts as a single-client server: it accepts one source, reads
//! it until the session ends, then goes back to accepting.

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::media::FramingReader;

use super::{InputPhase, InputWorker};

impl InputWorker {
    pub(super) async fn run_tcp(self: &Arc<Self>, bound: Option<TcpListener>) {
        let mut listener = bound;

        loop {
            if listener.is_none() {
                self.set_phase(InputPhase::Binding);
                match self.binding.bind_tcp().await {
                    Ok(fresh) => listener = Some(fresh),
                    Err(e) => {
                        tracing::error!(path = %self.key(), error = %e, "Failed to bind TCP input");
                        if !self.pause(self.wait_interval).await {
                            return;
                        }
                        continue;
                    }
                }
            }
            let Some(active) = listener.as_ref() else {
                continue;
            };

            self.set_phase(InputPhase::Accepting);
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => return,
                res = active.accept() => res,
            };

            let (socket, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(path = %self.key(), error = %e, "Failed to accept input source");
                    if !self.pause(self.wait_interval).await {
                        return;
                    }
                    continue;
                }
            };

            tracing::info!(
                path = %self.key(),
                peer = %peer,
                local = ?self.binding.local_addr(),
                "Input source connected"
            );

            let shared = self.new_session(Some(peer));
            let mut reader = FramingReader::with_shared(socket, shared, self.cancel.child_token());
            let end = self.read_session(&mut reader, None).await;
            drop(reader);

            if !self.finish_session(end).await {
                return;
            }
        }
    }
}

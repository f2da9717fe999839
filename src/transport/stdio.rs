//! JSON-lines transport adapter
//!
//! Reads one [`InboundMessage`] per line, routes it to the manager of the
//! addressed pool and writes every notification back as an
//! [`OutboundMessage`] line. Each joined participant gets a
//! [`ChannelHandle`] on a shared outbound channel.

use crate::error::{PairingError, Result};
use crate::pairing::PairingManager;
use crate::transport::handle::{ChannelHandle, ConnectionHandle};
use crate::transport::messages::{CommandMessage, InboundMessage, OutboundMessage};
use crate::types::{ParticipantId, PoolKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type HandleKey = (PoolKind, ParticipantId);

/// Routes inbound lines to pool managers
pub struct LineRouter {
    managers: HashMap<PoolKind, PairingManager>,
    sender: mpsc::UnboundedSender<OutboundMessage>,
    handles: Mutex<HashMap<HandleKey, Arc<ChannelHandle>>>,
}

impl LineRouter {
    pub fn new(
        managers: HashMap<PoolKind, PairingManager>,
        sender: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        Self {
            managers,
            sender,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Number of participants with an open handle
    pub fn connected_count(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }

    /// Parse and dispatch a single line
    pub async fn handle_line(&self, line: &str) -> Result<()> {
        let InboundMessage { pool, command } = InboundMessage::from_line(line)?;

        let manager = self
            .managers
            .get(&pool)
            .ok_or_else(|| PairingError::InvalidMessage {
                reason: format!("Pool {} is not enabled", pool),
            })?;

        let identity = command.identity().to_string();
        let is_disconnect = matches!(command, CommandMessage::Disconnect { .. });

        let mut joined: Option<Arc<ChannelHandle>> = None;
        let pool_command = command.into_command(|id| {
            let handle = Arc::new(ChannelHandle::new(id, pool, self.sender.clone()));
            joined = Some(handle.clone());
            handle as Arc<dyn ConnectionHandle>
        });

        let result = manager.dispatch(pool_command).await;

        let mut handles = self
            .handles
            .lock()
            .map_err(|_| PairingError::InternalError {
                message: "Failed to acquire handles lock".to_string(),
            })?;
        match joined {
            Some(handle) if result.is_ok() => {
                if handles.insert((pool, identity.clone()), handle).is_some() {
                    debug!("Replaced handle for '{}' in {} pool", identity, pool);
                }
            }
            _ => {}
        }
        if is_disconnect {
            if let Some(handle) = handles.remove(&(pool, identity.clone())) {
                handle.close();
            }
        }

        result
    }

    /// Process lines until end of input. Returns how many lines were read.
    ///
    /// A line that fails to parse or is rejected is logged and skipped.
    pub async fn run<R>(&self, reader: R) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut processed = 0;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            processed += 1;
            if let Err(e) = self.handle_line(&line).await {
                warn!("Inbound line {} not applied: {}", processed, e);
            }
        }

        info!("Inbound stream closed after {} lines", processed);
        Ok(processed)
    }
}

/// Write outbound messages as JSON lines until every sender is dropped
pub fn spawn_writer<W>(
    mut receiver: mpsc::UnboundedReceiver<OutboundMessage>,
    mut writer: W,
) -> JoinHandle<Result<usize>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut written = 0;
        while let Some(message) = receiver.recv().await {
            match message.to_line() {
                Ok(line) => {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await?;
                    written += 1;
                }
                Err(e) => error!(
                    "Dropping {} for '{}': {}",
                    message.notification.kind(),
                    message.participant_id,
                    e
                ),
            }
        }
        Ok(written)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::PairingManagerConfig;
    use crate::transport::messages::Notification;
    use tokio::io::BufReader;

    fn create_test_router() -> (LineRouter, PairingManager, mpsc::UnboundedReceiver<OutboundMessage>) {
        let manager = PairingManager::new(PairingManagerConfig::for_pool(PoolKind::Text));
        let (sender, receiver) = mpsc::unbounded_channel();
        let managers = HashMap::from([(PoolKind::Text, manager.clone())]);
        (LineRouter::new(managers, sender), manager, receiver)
    }

    fn join_line(id: &str, gender: &str, wants: &str) -> String {
        format!(
            r#"{{"pool":"text","command":{{"type":"join","identity":"{}","profile":{{"gender":"{}","affiliation":"X","preferredGender":"{}","preferredAffiliation":"X"}}}}}}"#,
            id, gender, wants
        )
    }

    fn drain(receiver: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = receiver.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test(start_paused = true)]
    async fn test_lines_drive_a_pairing() {
        let (router, manager, mut receiver) = create_test_router();
        let input = format!(
            "{}\n\n{}\n",
            join_line("p1", "male", "female"),
            join_line("p2", "female", "male")
        );

        let processed = router.run(BufReader::new(input.as_bytes())).await.unwrap();
        assert_eq!(processed, 2);
        assert_eq!(router.connected_count(), 2);

        manager.process_cycle().await.unwrap();

        let successes: Vec<_> = drain(&mut receiver)
            .into_iter()
            .filter(|m| matches!(m.notification, Notification::PairingSuccess { .. }))
            .map(|m| m.participant_id)
            .collect();
        assert_eq!(successes.len(), 2);
        assert!(successes.contains(&"p1".to_string()));
        assert!(successes.contains(&"p2".to_string()));
    }

    #[tokio::test]
    async fn test_disconnect_closes_handle() {
        let (router, manager, _receiver) = create_test_router();
        router
            .handle_line(&join_line("p1", "male", "any"))
            .await
            .unwrap();
        router
            .handle_line(r#"{"pool":"text","command":{"type":"disconnect","identity":"p1"}}"#)
            .await
            .unwrap();

        assert_eq!(router.connected_count(), 0);
        assert!(manager.participant("p1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_pool_and_bad_lines_rejected() {
        let (router, _manager, _receiver) = create_test_router();

        let err = router
            .handle_line(r#"{"pool":"video","command":{"type":"leaveQueue","identity":"p1"}}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not enabled"));

        assert!(router.handle_line("{oops").await.is_err());

        let processed = router
            .run(BufReader::new("{oops\nstill bad\n".as_bytes()))
            .await
            .unwrap();
        assert_eq!(processed, 2);
    }

    #[tokio::test]
    async fn test_rejected_join_is_reported_and_not_kept() {
        let (router, _manager, mut receiver) = create_test_router();

        let line = r#"{"pool":"text","command":{"type":"join","identity":"p1","profile":{"gender":"male","preferredGender":"robot"}}}"#;
        assert!(router.handle_line(line).await.is_err());

        let messages = drain(&mut receiver);
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            messages[0].notification,
            Notification::RequestRejected { .. }
        ));
        assert_eq!(router.connected_count(), 0);
    }

    #[tokio::test]
    async fn test_writer_emits_lines() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (client, mut server) = tokio::io::duplex(4096);
        let writer = spawn_writer(receiver, client);

        sender
            .send(OutboundMessage {
                pool: PoolKind::Audio,
                participant_id: "p1".to_string(),
                notification: Notification::PairDisconnected {
                    reason: "Counterpart disconnected".to_string(),
                },
            })
            .unwrap();
        drop(sender);

        assert_eq!(writer.await.unwrap().unwrap(), 1);

        let mut output = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut output)
            .await
            .unwrap();
        assert!(output.ends_with('\n'));
        assert!(output.contains("\"pairDisconnected\""));
    }
}

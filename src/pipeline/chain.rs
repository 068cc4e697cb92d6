//! Ordered, uniquely named stage list.

use std::future::poll_fn;
use std::task::{Context, Poll};

use thiserror::Error;

use super::command::PipelineCommand;
use super::stage::{Stage, StageName};
use super::PipelineEvent;
use crate::bootstrap::assembler::TlsStage;
use crate::bootstrap::idle::IdleEvent;
use crate::http::websocket::WebSocketUpgradeStage;

/// Error type for pipeline mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("stage '{0}' is already installed")]
    DuplicateStage(StageName),
    #[error("stage '{0}' is not installed")]
    UnknownStage(String),
}

#[derive(Debug)]
struct Entry {
    name: StageName,
    stage: Stage,
}

enum Undo {
    Added(StageName),
    Removed(usize, Entry),
}

/// The stages of one connection, in processing order.
///
/// Inbound data and idle events travel from the first stage to the last.
#[derive(Debug, Default)]
pub struct Pipeline {
    entries: Vec<Entry>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stage names in order.
    pub fn names(&self) -> Vec<StageName> {
        self.entries.iter().map(|entry| entry.name).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.stage)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Stage> {
        self.entries
            .iter_mut()
            .find(|entry| entry.name == name)
            .map(|entry| &mut entry.stage)
    }

    pub fn add_last(&mut self, name: StageName, stage: Stage) -> Result<(), PipelineError> {
        self.ensure_unique(name)?;
        self.entries.push(Entry { name, stage });
        Ok(())
    }

    pub fn add_before(
        &mut self,
        anchor: &str,
        name: StageName,
        stage: Stage,
    ) -> Result<(), PipelineError> {
        self.ensure_unique(name)?;
        let index = self.require(anchor)?;
        self.entries.insert(index, Entry { name, stage });
        Ok(())
    }

    pub fn add_after(
        &mut self,
        anchor: &str,
        name: StageName,
        stage: Stage,
    ) -> Result<(), PipelineError> {
        self.ensure_unique(name)?;
        let index = self.require(anchor)?;
        self.entries.insert(index + 1, Entry { name, stage });
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Stage, PipelineError> {
        let index = self.require(name)?;
        Ok(self.entries.remove(index).stage)
    }

    pub fn remove_if_present(&mut self, name: &str) -> Option<Stage> {
        self.remove(name).ok()
    }

    /// Drop every stage.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Apply a batch of commands in order. If any command fails, the batch is
    /// rolled back and the pipeline is left as it was.
    pub fn apply_all(
        &mut self,
        commands: impl IntoIterator<Item = PipelineCommand>,
    ) -> Result<(), PipelineError> {
        let mut undo = Vec::new();
        for command in commands {
            if let Err(err) = self.apply(command, &mut undo) {
                self.rollback(undo);
                return Err(err);
            }
        }
        Ok(())
    }

    fn apply(
        &mut self,
        command: PipelineCommand,
        undo: &mut Vec<Undo>,
    ) -> Result<(), PipelineError> {
        match command {
            PipelineCommand::AddLast { name, stage } => {
                self.add_last(name, stage)?;
                undo.push(Undo::Added(name));
            }
            PipelineCommand::AddBefore { anchor, name, stage } => {
                self.add_before(anchor, name, stage)?;
                undo.push(Undo::Added(name));
            }
            PipelineCommand::AddAfter { anchor, name, stage } => {
                self.add_after(anchor, name, stage)?;
                undo.push(Undo::Added(name));
            }
            PipelineCommand::Remove { name } => {
                let index = self.require(name)?;
                undo.push(Undo::Removed(index, self.entries.remove(index)));
            }
            PipelineCommand::RemoveIfPresent { name } => {
                if let Some(index) = self.position(name) {
                    undo.push(Undo::Removed(index, self.entries.remove(index)));
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for step in undo.into_iter().rev() {
            match step {
                Undo::Added(name) => {
                    self.remove_if_present(name);
                }
                Undo::Removed(index, entry) => {
                    let index = index.min(self.entries.len());
                    self.entries.insert(index, entry);
                }
            }
        }
    }

    fn ensure_unique(&self, name: StageName) -> Result<(), PipelineError> {
        if self.contains(name) {
            Err(PipelineError::DuplicateStage(name))
        } else {
            Ok(())
        }
    }

    fn require(&self, name: &str) -> Result<usize, PipelineError> {
        self.position(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))
    }

    pub fn tls_mut(&mut self) -> Option<&mut TlsStage> {
        self.entries.iter_mut().find_map(|entry| match &mut entry.stage {
            Stage::Tls(tls) => Some(tls),
            _ => None,
        })
    }

    pub fn websocket(&self) -> Option<&WebSocketUpgradeStage> {
        self.entries.iter().find_map(|entry| match &entry.stage {
            Stage::WebSocketUpgrade(stage) => Some(stage),
            _ => None,
        })
    }

    /// Wait for the next event from any installed stage.
    ///
    /// Cancel-safe: nothing is lost if the returned future is dropped before
    /// completion.
    pub async fn next_event(&mut self) -> PipelineEvent {
        poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Poll every stage for an event.
    ///
    /// A completed handshake is reported before any idle event that became
    /// ready in the same poll.
    pub fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<PipelineEvent> {
        if let Some(tls) = self.tls_mut() {
            if let Poll::Ready(result) = tls.poll_outcome(cx) {
                let elapsed = tls.elapsed();
                return Poll::Ready(PipelineEvent::HandshakeCompleted { result, elapsed });
            }
        }

        let mut index = 0;
        while index < self.entries.len() {
            let fired = match &mut self.entries[index].stage {
                Stage::IdleTimer(timer) => match timer.poll_expired(cx) {
                    Poll::Ready(event) => Some(event),
                    Poll::Pending => None,
                },
                _ => None,
            };

            let Some(event) = fired else {
                index += 1;
                continue;
            };

            let timer = self.entries[index].name;
            match self.route_idle(index, &event) {
                Some(action) => {
                    return Poll::Ready(PipelineEvent::Idle {
                        timer,
                        event,
                        action,
                    })
                }
                // Nobody after the timer cares; poll it again so it re-registers.
                None => tracing::trace!(timer, "Unhandled idle event dropped"),
            }
        }

        Poll::Pending
    }

    fn route_idle(&self, timer_index: usize, event: &IdleEvent) -> Option<super::IdleAction> {
        self.entries[timer_index + 1..]
            .iter()
            .find_map(|entry| entry.stage.on_idle(event))
    }
}

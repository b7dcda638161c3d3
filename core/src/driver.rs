//! Async driver that owns a [`DiagnosticSession`] inside a tokio task.
//!
//! Repository calls run in their own tasks and report back through a channel,
//! tagged with the generation that issued them, so a `reset` never waits for
//! an outstanding call. Each handle method resolves once its transition has
//! settled, including any repository round trips it triggered.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{SessionError, TransportError};
use crate::repository::{self, Reply, Request, SymptomRepository};
use crate::session::{DiagnosticSession, Effect, Event, SessionSnapshot};
use crate::symptoms::SymptomId;

type Outcome = Result<SessionSnapshot, SessionError>;

struct Command {
    event: Event,
    respond: oneshot::Sender<Outcome>,
}

struct Completion {
    generation: u64,
    reply: Result<Reply, TransportError>,
}

/// Cloneable front end for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Start the driver task. The session is not initialized yet.
    pub fn spawn<R>(repo: Arc<R>, session: DiagnosticSession) -> Self
    where
        R: SymptomRepository + ?Sized + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (snapshots_tx, snapshots_rx) = watch::channel(session.snapshot());

        let driver = Driver {
            repo,
            session,
            waiter: None,
            completions: completions_tx,
            snapshots: snapshots_tx,
        };
        tokio::spawn(driver.run(commands_rx, completions_rx));

        Self {
            commands: commands_tx,
            snapshots: snapshots_rx,
        }
    }

    pub async fn initialize(&self) -> Outcome {
        self.send(Event::Initialize).await
    }

    pub async fn select_yes(&self, sid: SymptomId) -> Outcome {
        self.send(Event::SelectYes(sid)).await
    }

    pub async fn reject(&self, sid: SymptomId) -> Outcome {
        self.send(Event::Reject(sid)).await
    }

    pub async fn cancel_confirmation(&self) -> Outcome {
        self.send(Event::CancelConfirmation).await
    }

    pub async fn confirm(&self) -> Outcome {
        self.send(Event::Confirm).await
    }

    /// Always accepted. Any operation still waiting on the knowledge base
    /// resolves with [`SessionError::Superseded`].
    pub async fn reset(&self) -> Outcome {
        self.send(Event::Reset).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    async fn send(&self, event: Event) -> Outcome {
        let (respond, response) = oneshot::channel();
        self.commands
            .send(Command { event, respond })
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }
}

struct Driver<R: ?Sized> {
    repo: Arc<R>,
    session: DiagnosticSession,
    /// Caller whose transition is waiting on a repository call
    waiter: Option<oneshot::Sender<Outcome>>,
    completions: mpsc::UnboundedSender<Completion>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl<R> Driver<R>
where
    R: SymptomRepository + ?Sized + 'static,
{
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(completion) = completions.recv() => self.on_completion(completion),
            }
        }
        tracing::debug!(crop = %self.session.crop_id(), "session driver stopped");
    }

    fn on_command(&mut self, command: Command) {
        if matches!(command.event, Event::Reset) {
            if let Some(waiter) = self.waiter.take() {
                let _ = waiter.send(Err(SessionError::Superseded));
            }
        }

        // Snapshots are published before replying so a caller that reads
        // `snapshot()` after its operation returns sees the new state.
        match self.session.handle(command.event) {
            Ok(Effect::Fetch(request)) => {
                self.dispatch(request);
                self.waiter = Some(command.respond);
                self.publish();
            }
            Ok(_) => {
                self.publish();
                let _ = command.respond.send(Ok(self.session.snapshot()));
            }
            Err(err) => {
                self.publish();
                let _ = command.respond.send(Err(err));
            }
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        let event = Event::Fetched {
            generation: completion.generation,
            reply: completion.reply,
        };
        let outcome = match self.session.handle(event) {
            // The waiter, if any, belongs to a newer generation.
            Ok(Effect::Ignored) => return,
            Ok(Effect::Fetch(request)) => {
                self.dispatch(request);
                self.publish();
                return;
            }
            Ok(Effect::None) => Ok(self.session.snapshot()),
            Err(err) => Err(err),
        };
        self.publish();
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(outcome);
        }
    }

    fn dispatch(&self, request: Request) {
        let repo = Arc::clone(&self.repo);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let reply = repository::execute(repo.as_ref(), &request.query).await;
            let _ = completions.send(Completion {
                generation: request.generation,
                reply,
            });
        });
    }

    fn publish(&self) {
        let next = self.session.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

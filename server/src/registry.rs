//! Session registry mapping game codes to live sessions
//!
//! Owned exclusively by the dispatch loop; sessions themselves never touch
//! it. Creating a session generates a code not currently in use (the
//! 6-character space makes collisions rare, but they are retried rather
//! than ignored), snapshots the question bank, and spawns the session task.

use log::info;
use rand::Rng;
use shared::{Question, GAME_CODE_LEN};
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::network::{GameMessage, ServerMessage};
use crate::session::{GameSession, SessionCommand};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Command channel into one live session task.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Fails only when the session task has already exited.
    pub fn send(
        &self,
        command: SessionCommand,
    ) -> Result<(), mpsc::error::SendError<SessionCommand>> {
        self.commands.send(command)
    }
}

/// All live sessions, keyed by game code.
pub struct SessionRegistry {
    sessions: HashMap<String, SessionHandle>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Creates a new game in the waiting phase with its own copy of the
    /// question bank, spawns its task, and returns the assigned code.
    pub fn create_session(
        &mut self,
        questions: Vec<Question>,
        outbound: mpsc::UnboundedSender<GameMessage>,
        server_tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> String {
        let code = self.unique_code();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let session = GameSession::new(code.clone(), questions, outbound, server_tx);
        tokio::spawn(session.run(command_rx));

        self.sessions.insert(code.clone(), SessionHandle { commands });
        info!(
            "Created game {} ({} live sessions)",
            code,
            self.sessions.len()
        );

        code
    }

    pub fn lookup(&self, code: &str) -> Option<&SessionHandle> {
        self.sessions.get(code)
    }

    /// Removes a session entry. Idempotent; called when a session reaches
    /// the end of its retention window.
    pub fn remove(&mut self, code: &str) -> bool {
        if self.sessions.remove(code).is_some() {
            info!(
                "Removed game {} ({} live sessions)",
                code,
                self.sessions.len()
            );
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn unique_code(&self) -> String {
        loop {
            let code = generate_game_code();
            if !self.sessions.contains_key(&code) {
                return code;
            }
        }
    }
}

/// Random 6-character uppercase alphanumeric game code.
pub fn generate_game_code() -> String {
    let mut rng = rand::thread_rng();
    (0..GAME_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

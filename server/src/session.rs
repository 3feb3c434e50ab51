//! Game session state machine
//!
//! Each live game runs as its own tokio task owning all of the session's
//! mutable state. Commands from the network dispatch loop arrive over an
//! mpsc channel and are processed strictly in order, so concurrent
//! submissions can never interleave mid-transition. Phase changes that
//! auto-advance (starting delay, question time limit, reveal and leaderboard
//! delays, post-game retention) are represented by a single pending deadline
//! driven by the task's own select loop; arming a new deadline replaces the
//! previous one, which keeps the "at most one timer pending" invariant by
//! construction and makes the all-answered shortcut a plain in-task
//! transition rather than a race against a callback.

use log::{debug, error, info, warn};
use shared::{
    calculate_score, ErrorKind, LeaderboardEntry, Packet, Phase, Question,
    LEADERBOARD_DELAY_SECS, LEADERBOARD_SNAPSHOT_LEN, MAX_NICKNAME_LEN, MAX_PLAYERS,
    RETENTION_SECS, REVEAL_DELAY_SECS, STARTING_DELAY_SECS,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::network::{GameMessage, ServerMessage};

/// Commands routed to a session by the dispatch loop. Every command carries
/// the originating connection so rejections can be reported to it alone.
#[derive(Debug)]
pub enum SessionCommand {
    Join {
        addr: SocketAddr,
        nickname: String,
    },
    Start {
        addr: SocketAddr,
    },
    SubmitAnswer {
        addr: SocketAddr,
        question_id: u32,
        answer_index: u8,
        elapsed_seconds: f32,
    },
    Leaderboard {
        addr: SocketAddr,
    },
    Status {
        addr: SocketAddr,
    },
    Disconnect {
        addr: SocketAddr,
    },
}

/// A player's answer to one question. At most one record exists per
/// (player, question) pair; it is created at submission time and never
/// overwritten.
#[derive(Debug, Clone)]
pub struct AnswerRecord {
    pub question_id: u32,
    pub chosen_option_index: u8,
    pub is_correct: bool,
    pub elapsed_seconds: f32,
    pub points_awarded: u32,
}

/// Per-participant state, owned exclusively by the session.
#[derive(Debug)]
pub struct Player {
    pub id: u32,
    pub addr: SocketAddr,
    pub nickname: String,
    pub score: u32,
    pub answers: HashMap<u32, AnswerRecord>,
}

/// The transition a pending deadline will perform when it fires. Each
/// variant is only valid while the session is still in the phase it was
/// armed in; `fire` re-checks before acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advance {
    AskQuestion,
    RevealAnswer,
    ShowLeaderboard,
    NextOrFinish,
    Expire,
}

impl Advance {
    fn armed_phase(self) -> Phase {
        match self {
            Advance::AskQuestion => Phase::Starting,
            Advance::RevealAnswer => Phase::Question,
            Advance::ShowLeaderboard => Phase::AnswerReveal,
            Advance::NextOrFinish => Phase::Leaderboard,
            Advance::Expire => Phase::Finished,
        }
    }
}

#[derive(Debug)]
struct Pending {
    at: Instant,
    advance: Advance,
}

/// One game from WAITING to FINISHED. Owns its roster, its snapshot of the
/// question bank, and the single pending deadline.
pub struct GameSession {
    code: String,
    phase: Phase,
    players: Vec<Player>,
    questions: Vec<Question>,
    current_question: Option<usize>,
    phase_started_at: Instant,
    pending: Option<Pending>,
    next_player_id: u32,
    closed: bool,
    outbound: mpsc::UnboundedSender<GameMessage>,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl GameSession {
    pub fn new(
        code: String,
        questions: Vec<Question>,
        outbound: mpsc::UnboundedSender<GameMessage>,
        server_tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            code,
            phase: Phase::Waiting,
            players: Vec::new(),
            questions,
            current_question: None,
            phase_started_at: Instant::now(),
            pending: None,
            next_player_id: 1,
            closed: false,
            outbound,
            server_tx,
        }
    }

    /// Drives the session until it expires or the registry drops its
    /// command handle. Commands and deadline firings are interleaved by a
    /// single select loop, so they can never observe a half-applied
    /// transition.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        info!(
            "Session {} opened with {} questions",
            self.code,
            self.questions.len()
        );

        loop {
            let deadline = self.pending.as_ref().map(|p| p.at);

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))),
                    if deadline.is_some() =>
                {
                    if let Some(pending) = self.pending.take() {
                        self.fire(pending.advance);
                    }
                },
            }

            if self.closed {
                break;
            }
        }

        debug!("Session {} task exited", self.code);
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Join { addr, nickname } => self.handle_join(addr, nickname),
            SessionCommand::Start { addr } => self.handle_start(addr),
            SessionCommand::SubmitAnswer {
                addr,
                question_id,
                answer_index,
                elapsed_seconds,
            } => self.handle_submit(addr, question_id, answer_index, elapsed_seconds),
            SessionCommand::Leaderboard { addr } => self.handle_leaderboard(addr),
            SessionCommand::Status { addr } => self.handle_status(addr),
            SessionCommand::Disconnect { addr } => self.handle_disconnect(addr),
        }
    }

    /// Performs the transition a deadline was armed for, unless the session
    /// has already moved past that phase (e.g. the all-answered shortcut
    /// beat the question timer).
    fn fire(&mut self, advance: Advance) {
        if self.phase != advance.armed_phase() {
            warn!(
                "Session {}: stale deadline for phase {:?} fired in phase {:?}, ignoring",
                self.code,
                advance.armed_phase(),
                self.phase
            );
            return;
        }

        match advance {
            Advance::AskQuestion => self.ask_question(),
            Advance::RevealAnswer => self.reveal_answer(),
            Advance::ShowLeaderboard => self.show_leaderboard(),
            Advance::NextOrFinish => self.next_or_finish(),
            Advance::Expire => self.expire(),
        }
    }

    fn handle_join(&mut self, addr: SocketAddr, nickname: String) {
        if self.phase != Phase::Waiting {
            self.send_error(addr, ErrorKind::InvalidPhase, "Game already in progress");
            return;
        }
        if self.players.len() >= MAX_PLAYERS {
            self.send_error(addr, ErrorKind::Capacity, "Game is full");
            return;
        }

        let nickname = nickname.trim().to_string();
        if nickname.is_empty() || nickname.chars().count() > MAX_NICKNAME_LEN {
            self.send_error(
                addr,
                ErrorKind::Validation,
                "Nickname must be between 1 and 20 characters",
            );
            return;
        }
        if self.players.iter().any(|p| p.addr == addr) {
            self.send_error(addr, ErrorKind::Validation, "Already in this game");
            return;
        }

        let player_id = self.next_player_id;
        self.next_player_id += 1;

        self.players.push(Player {
            id: player_id,
            addr,
            nickname: nickname.clone(),
            score: 0,
            answers: HashMap::new(),
        });

        self.send(
            addr,
            Packet::JoinedGame {
                game_code: self.code.clone(),
                nickname: nickname.clone(),
                player_id,
            },
        );
        self.broadcast(Packet::PlayerJoined {
            nickname: nickname.clone(),
            player_count: self.players.len(),
        });
        self.notify(ServerMessage::PlayerRegistered {
            addr,
            game_code: self.code.clone(),
        });

        info!("Player {} joined game {}", nickname, self.code);
    }

    fn handle_start(&mut self, addr: SocketAddr) {
        if self.phase != Phase::Waiting {
            self.send_error(addr, ErrorKind::InvalidPhase, "Game already started");
            return;
        }
        if self.players.is_empty() {
            self.send_error(addr, ErrorKind::Validation, "No players in game");
            return;
        }
        if self.questions.is_empty() {
            self.send_error(addr, ErrorKind::Validation, "No questions loaded");
            return;
        }

        self.phase = Phase::Starting;
        self.phase_started_at = Instant::now();
        self.current_question = Some(0);

        self.broadcast(Packet::GameStarting {
            total_questions: self.questions.len(),
        });
        self.schedule(STARTING_DELAY_SECS, Advance::AskQuestion);

        info!(
            "Game {} started with {} players",
            self.code,
            self.players.len()
        );
    }

    fn handle_submit(
        &mut self,
        addr: SocketAddr,
        question_id: u32,
        answer_index: u8,
        elapsed_seconds: f32,
    ) {
        if self.phase != Phase::Question {
            self.send_error(
                addr,
                ErrorKind::InvalidPhase,
                "Not accepting answers right now",
            );
            return;
        }

        let Some((current_id, correct_index, time_limit)) = self
            .current_question
            .and_then(|i| self.questions.get(i))
            .map(|q| (q.id, q.correct_option_index, q.time_limit_seconds))
        else {
            return;
        };

        if current_id != question_id {
            self.send_error(
                addr,
                ErrorKind::Validation,
                "Answer does not match the current question",
            );
            return;
        }
        if answer_index > 3 {
            self.send_error(addr, ErrorKind::Validation, "Unrecognized answer index");
            return;
        }

        let Some(player) = self.players.iter_mut().find(|p| p.addr == addr) else {
            self.send_error(addr, ErrorKind::NotFound, "Invalid game or player");
            return;
        };

        // Retransmitted answers are dropped without a second ack.
        if player.answers.contains_key(&question_id) {
            debug!(
                "Player {} re-submitted question {} in game {}, ignoring",
                player.nickname, question_id, self.code
            );
            return;
        }

        let is_correct = answer_index == correct_index;
        let points_awarded = if is_correct {
            calculate_score(elapsed_seconds, time_limit)
        } else {
            0
        };

        player.answers.insert(
            question_id,
            AnswerRecord {
                question_id,
                chosen_option_index: answer_index,
                is_correct,
                elapsed_seconds,
                points_awarded,
            },
        );
        if is_correct {
            player.score = player.score.saturating_add(points_awarded);
        }

        let total_score = player.score;
        let nickname = player.nickname.clone();

        self.send(
            addr,
            Packet::AnswerSubmitted {
                correct: is_correct,
                points_awarded,
                total_score,
            },
        );

        info!(
            "Player {} answered question {} in game {}: {}",
            nickname,
            question_id,
            self.code,
            if is_correct { "correct" } else { "incorrect" }
        );

        self.check_all_answered(question_id);
    }

    /// Advances to the reveal early once every current player has answered.
    /// Also re-evaluated when a player leaves mid-question, since that
    /// shrinks the denominator.
    fn check_all_answered(&mut self, question_id: u32) {
        if self.phase != Phase::Question {
            return;
        }

        let answered = self
            .players
            .iter()
            .filter(|p| p.answers.contains_key(&question_id))
            .count();
        let total = self.players.len();

        debug!(
            "{}/{} players answered question {} in game {}",
            answered, total, question_id, self.code
        );

        if total > 0 && answered == total {
            info!(
                "All players answered question {} in game {}; advancing early",
                question_id, self.code
            );
            self.pending = None;
            self.reveal_answer();
        }
    }

    fn handle_leaderboard(&mut self, addr: SocketAddr) {
        self.send(
            addr,
            Packet::LeaderboardUpdate {
                leaderboard: leaderboard(&self.players, Some(LEADERBOARD_SNAPSHOT_LEN)),
            },
        );
    }

    fn handle_status(&mut self, addr: SocketAddr) {
        let total = self.questions.len();
        let current = self
            .current_question
            .map(|i| (i + 1).min(total))
            .unwrap_or(0);

        self.send(
            addr,
            Packet::GameStatusResponse {
                game_code: self.code.clone(),
                phase: self.phase,
                player_count: self.players.len(),
                current_question: current,
                total_questions: total,
            },
        );
    }

    fn handle_disconnect(&mut self, addr: SocketAddr) {
        let Some(position) = self.players.iter().position(|p| p.addr == addr) else {
            return;
        };
        let player = self.players.remove(position);

        self.broadcast(Packet::PlayerLeft {
            nickname: player.nickname.clone(),
            player_count: self.players.len(),
        });
        self.notify(ServerMessage::PlayerUnregistered { addr });

        info!("Player {} left game {}", player.nickname, self.code);

        // A departing player may have been the last one holding up the
        // question; the remaining roster is re-checked against it.
        if self.phase == Phase::Question {
            if let Some(question_id) = self
                .current_question
                .and_then(|i| self.questions.get(i))
                .map(|q| q.id)
            {
                self.check_all_answered(question_id);
            }
        }
    }

    fn ask_question(&mut self) {
        let Some((index, question)) = self
            .current_question
            .and_then(|i| self.questions.get(i).map(|q| (i, q)))
        else {
            return;
        };

        let packet = Packet::QuestionStart {
            question_number: index + 1,
            total_questions: self.questions.len(),
            question_id: question.id,
            prompt: question.prompt.clone(),
            options: question.options.clone(),
            time_limit_seconds: question.time_limit_seconds,
        };
        let time_limit = question.time_limit_seconds;

        self.phase = Phase::Question;
        self.phase_started_at = Instant::now();
        self.broadcast(packet);
        self.schedule(time_limit, Advance::RevealAnswer);

        info!(
            "Question {}/{} started for game {}",
            index + 1,
            self.questions.len(),
            self.code
        );
    }

    fn reveal_answer(&mut self) {
        self.pending = None;

        let Some(question) = self.current_question.and_then(|i| self.questions.get(i)) else {
            return;
        };

        let correct_option_index = question.correct_option_index;
        let correct_option = question
            .options
            .get(correct_option_index as usize)
            .map(String::as_str)
            .unwrap_or_default();
        let explanation = format!("The correct answer is: {}", correct_option);

        debug!(
            "Question {} in game {} was open for {:?}",
            question.id,
            self.code,
            self.phase_started_at.elapsed()
        );

        self.phase = Phase::AnswerReveal;
        self.phase_started_at = Instant::now();
        self.broadcast(Packet::AnswerReveal {
            correct_option_index,
            explanation,
        });
        self.schedule(REVEAL_DELAY_SECS, Advance::ShowLeaderboard);

        info!("Answer revealed for game {}", self.code);
    }

    fn show_leaderboard(&mut self) {
        self.pending = None;

        let question_number = self.current_question.map(|i| i + 1).unwrap_or(0);

        self.phase = Phase::Leaderboard;
        self.phase_started_at = Instant::now();
        self.broadcast(Packet::LeaderboardShow {
            leaderboard: leaderboard(&self.players, None),
            question_number,
            total_questions: self.questions.len(),
        });
        self.schedule(LEADERBOARD_DELAY_SECS, Advance::NextOrFinish);

        info!("Leaderboard shown for game {}", self.code);
    }

    fn next_or_finish(&mut self) {
        let next = self.current_question.map(|i| i + 1).unwrap_or(0);

        if next < self.questions.len() {
            self.current_question = Some(next);
            self.ask_question();
        } else {
            self.current_question = Some(self.questions.len());
            self.finish();
        }
    }

    fn finish(&mut self) {
        self.pending = None;

        self.phase = Phase::Finished;
        self.phase_started_at = Instant::now();
        self.broadcast(Packet::GameFinished {
            leaderboard: leaderboard(&self.players, None),
        });
        self.schedule(RETENTION_SECS, Advance::Expire);

        info!("Game {} finished", self.code);
    }

    /// End of the retention window: hand the code and the remaining member
    /// connections back to the dispatch loop for removal, then stop the
    /// task. Nothing can fire into the session afterwards because the task
    /// owns every deadline.
    fn expire(&mut self) {
        let members = self.players.iter().map(|p| p.addr).collect();
        self.notify(ServerMessage::SessionExpired {
            game_code: self.code.clone(),
            members,
        });
        self.closed = true;

        info!("Game {} cleaned up", self.code);
    }

    /// Arms the session's single deadline, replacing (and thereby
    /// cancelling) whatever was scheduled before.
    fn schedule(&mut self, delay_seconds: f32, advance: Advance) {
        self.pending = Some(Pending {
            at: Instant::now() + Duration::from_secs_f32(delay_seconds),
            advance,
        });
    }

    fn send(&self, addr: SocketAddr, packet: Packet) {
        if let Err(e) = self.outbound.send(GameMessage::SendPacket { packet, addr }) {
            error!("Session {}: failed to queue packet: {}", self.code, e);
        }
    }

    fn broadcast(&self, packet: Packet) {
        let addrs: Vec<SocketAddr> = self.players.iter().map(|p| p.addr).collect();
        if addrs.is_empty() {
            return;
        }
        if let Err(e) = self
            .outbound
            .send(GameMessage::BroadcastPacket { packet, addrs })
        {
            error!("Session {}: failed to queue broadcast: {}", self.code, e);
        }
    }

    fn send_error(&self, addr: SocketAddr, kind: ErrorKind, message: &str) {
        self.send(
            addr,
            Packet::Error {
                kind,
                message: message.to_string(),
            },
        );
    }

    fn notify(&self, message: ServerMessage) {
        if let Err(e) = self.server_tx.send(message) {
            error!(
                "Session {}: failed to notify dispatch loop: {}",
                self.code, e
            );
        }
    }
}

/// Projects the roster to (nickname, score) sorted by score descending.
/// The sort is stable over the join-ordered roster, so ties keep join
/// order. `limit` truncates for on-demand snapshots; phase broadcasts send
/// the full roster.
pub fn leaderboard(players: &[Player], limit: Option<usize>) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = players
        .iter()
        .map(|p| LeaderboardEntry {
            nickname: p.nickname.clone(),
            score: p.score,
        })
        .collect();

    entries.sort_by(|a, b| b.score.cmp(&a.score));

    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

    fn fixture_questions(count: usize, time_limit: f32) -> Vec<Question> {
        (0..count)
            .map(|i| Question {
                id: i as u32 + 1,
                prompt: format!("Question {}", i + 1),
                options: [
                    "Option A".to_string(),
                    "Option B".to_string(),
                    "Option C".to_string(),
                    "Option D".to_string(),
                ],
                correct_option_index: 1,
                time_limit_seconds: time_limit,
            })
            .collect()
    }

    fn player_addr(n: u16) -> SocketAddr {
        format!("127.0.0.1:{}", 40000 + n).parse().unwrap()
    }

    struct Harness {
        commands: UnboundedSender<SessionCommand>,
        outbound: UnboundedReceiver<GameMessage>,
        server_rx: UnboundedReceiver<ServerMessage>,
    }

    impl Harness {
        fn spawn(questions: Vec<Question>) -> Self {
            let (game_tx, outbound) = mpsc::unbounded_channel();
            let (server_tx, server_rx) = mpsc::unbounded_channel();
            let (commands, command_rx) = mpsc::unbounded_channel();

            let session =
                GameSession::new("TEST01".to_string(), questions, game_tx, server_tx);
            tokio::spawn(session.run(command_rx));

            Harness {
                commands,
                outbound,
                server_rx,
            }
        }

        fn send(&self, command: SessionCommand) {
            self.commands.send(command).unwrap();
        }

        async fn next(&mut self) -> (Packet, Vec<SocketAddr>) {
            match self.outbound.recv().await.expect("session closed outbound") {
                GameMessage::SendPacket { packet, addr } => (packet, vec![addr]),
                GameMessage::BroadcastPacket { packet, addrs } => (packet, addrs),
            }
        }

        /// Receives packets until `matches` returns true, panicking after a
        /// bounded number of packets.
        async fn next_matching(
            &mut self,
            matches: impl Fn(&Packet) -> bool,
        ) -> (Packet, Vec<SocketAddr>) {
            for _ in 0..300 {
                let (packet, targets) = self.next().await;
                if matches(&packet) {
                    return (packet, targets);
                }
            }
            panic!("expected packet never arrived");
        }

        fn join(&self, n: u16, nickname: &str) {
            self.send(SessionCommand::Join {
                addr: player_addr(n),
                nickname: nickname.to_string(),
            });
        }

        fn submit(&self, n: u16, question_id: u32, answer_index: u8, elapsed: f32) {
            self.send(SessionCommand::SubmitAnswer {
                addr: player_addr(n),
                question_id,
                answer_index,
                elapsed_seconds: elapsed,
            });
        }
    }

    #[tokio::test]
    async fn test_join_rejected_when_full() {
        let mut h = Harness::spawn(fixture_questions(1, 20.0));

        for i in 0..MAX_PLAYERS as u16 {
            h.join(i, &format!("player{}", i));
        }
        h.join(50, "latecomer");

        let (packet, targets) = h
            .next_matching(|p| matches!(p, Packet::Error { .. }))
            .await;
        match packet {
            Packet::Error { kind, .. } => assert_eq!(kind, ErrorKind::Capacity),
            _ => unreachable!(),
        }
        assert_eq!(targets, vec![player_addr(50)]);
    }

    #[tokio::test]
    async fn test_join_rejected_after_start() {
        let mut h = Harness::spawn(fixture_questions(1, 20.0));

        h.join(1, "Alice");
        h.send(SessionCommand::Start {
            addr: player_addr(1),
        });
        h.join(2, "Bob");

        let (packet, targets) = h
            .next_matching(|p| matches!(p, Packet::Error { .. }))
            .await;
        match packet {
            Packet::Error { kind, .. } => assert_eq!(kind, ErrorKind::InvalidPhase),
            _ => unreachable!(),
        }
        assert_eq!(targets, vec![player_addr(2)]);
    }

    #[tokio::test]
    async fn test_join_rejected_for_bad_nickname() {
        let mut h = Harness::spawn(fixture_questions(1, 20.0));

        h.join(1, "this nickname is far too long to accept");
        let (packet, _) = h.next().await;
        match packet {
            Packet::Error { kind, .. } => assert_eq!(kind, ErrorKind::Validation),
            other => panic!("expected validation error, got {:?}", other),
        }

        h.join(2, "   ");
        let (packet, _) = h.next().await;
        assert!(matches!(
            packet,
            Packet::Error {
                kind: ErrorKind::Validation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_start_rejected_without_players() {
        let mut h = Harness::spawn(fixture_questions(1, 20.0));

        h.send(SessionCommand::Start {
            addr: player_addr(1),
        });

        let (packet, _) = h.next().await;
        assert!(matches!(
            packet,
            Packet::Error {
                kind: ErrorKind::Validation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_submit_rejected_outside_question_phase() {
        let mut h = Harness::spawn(fixture_questions(1, 20.0));

        h.join(1, "Alice");
        h.submit(1, 1, 0, 1.0);

        let (packet, targets) = h
            .next_matching(|p| matches!(p, Packet::Error { .. }))
            .await;
        assert!(matches!(
            packet,
            Packet::Error {
                kind: ErrorKind::InvalidPhase,
                ..
            }
        ));
        assert_eq!(targets, vec![player_addr(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_answered_shortcut_cancels_timer() {
        let mut h = Harness::spawn(fixture_questions(1, 20.0));

        h.join(1, "Alice");
        h.join(2, "Bob");
        h.send(SessionCommand::Start {
            addr: player_addr(1),
        });

        h.next_matching(|p| matches!(p, Packet::QuestionStart { .. }))
            .await;
        let asked_at = Instant::now();

        // Both answers land before awaiting again, so virtual time cannot
        // advance to the 20s question deadline in between.
        h.submit(1, 1, 1, 2.0);
        h.submit(2, 1, 0, 3.0);

        let (reveal, targets) = h
            .next_matching(|p| matches!(p, Packet::AnswerReveal { .. }))
            .await;
        assert!(asked_at.elapsed() < Duration::from_secs_f32(20.0));
        assert_eq!(targets.len(), 2);
        match reveal {
            Packet::AnswerReveal {
                correct_option_index,
                explanation,
            } => {
                assert_eq!(correct_option_index, 1);
                assert!(explanation.contains("Option B"));
            }
            _ => unreachable!(),
        }

        // Exactly one reveal for the question: drain to the end of the game
        // and count.
        let mut reveals = 0;
        loop {
            let (packet, _) = h.next().await;
            match packet {
                Packet::AnswerReveal { .. } => reveals += 1,
                Packet::GameFinished { .. } => break,
                _ => {}
            }
        }
        assert_eq!(reveals, 0, "reveal broadcast more than once");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_reveals_when_some_never_answer() {
        let mut h = Harness::spawn(fixture_questions(1, 20.0));

        h.join(1, "Alice");
        h.join(2, "Bob");
        h.send(SessionCommand::Start {
            addr: player_addr(1),
        });

        h.next_matching(|p| matches!(p, Packet::QuestionStart { .. }))
            .await;
        let asked_at = Instant::now();

        h.submit(1, 1, 1, 2.0);
        h.next_matching(|p| matches!(p, Packet::AnswerSubmitted { .. }))
            .await;

        // Bob never answers: the next reveal can only come from the
        // question deadline.
        let (_, _) = h
            .next_matching(|p| matches!(p, Packet::AnswerReveal { .. }))
            .await;
        assert!(asked_at.elapsed() >= Duration::from_secs_f32(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hostile_elapsed_keeps_session_running() {
        let mut h = Harness::spawn(fixture_questions(1, 20.0));

        h.join(1, "Alice");
        h.send(SessionCommand::Start {
            addr: player_addr(1),
        });
        h.next_matching(|p| matches!(p, Packet::QuestionStart { .. }))
            .await;

        // A wildly negative reported elapsed time must saturate the score,
        // not panic or wrap the session's arithmetic.
        h.submit(1, 1, 1, -1.0e12);

        let (ack, _) = h
            .next_matching(|p| matches!(p, Packet::AnswerSubmitted { .. }))
            .await;
        match ack {
            Packet::AnswerSubmitted {
                correct,
                points_awarded,
                total_score,
            } => {
                assert!(correct);
                assert_eq!(points_awarded, u32::MAX);
                assert_eq!(total_score, u32::MAX);
            }
            _ => unreachable!(),
        }

        // The session is still alive and advances normally.
        h.next_matching(|p| matches!(p, Packet::AnswerReveal { .. }))
            .await;
        h.next_matching(|p| matches!(p, Packet::GameFinished { .. }))
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_of_holdout_triggers_reveal() {
        let mut h = Harness::spawn(fixture_questions(1, 20.0));

        h.join(1, "Alice");
        h.join(2, "Bob");
        h.send(SessionCommand::Start {
            addr: player_addr(1),
        });

        h.next_matching(|p| matches!(p, Packet::QuestionStart { .. }))
            .await;
        let asked_at = Instant::now();

        h.submit(1, 1, 1, 2.0);
        h.send(SessionCommand::Disconnect {
            addr: player_addr(2),
        });

        let (_, targets) = h
            .next_matching(|p| matches!(p, Packet::AnswerReveal { .. }))
            .await;
        assert!(asked_at.elapsed() < Duration::from_secs_f32(20.0));
        // Bob is gone; only Alice receives the reveal.
        assert_eq!(targets, vec![player_addr(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_answer_is_silent_noop() {
        let mut h = Harness::spawn(fixture_questions(1, 20.0));

        h.join(1, "Alice");
        h.join(2, "Bob");
        h.send(SessionCommand::Start {
            addr: player_addr(1),
        });

        h.next_matching(|p| matches!(p, Packet::QuestionStart { .. }))
            .await;

        h.submit(1, 1, 1, 0.0);
        let (ack, _) = h
            .next_matching(|p| matches!(p, Packet::AnswerSubmitted { .. }))
            .await;
        let first_total = match ack {
            Packet::AnswerSubmitted { total_score, .. } => total_score,
            _ => unreachable!(),
        };
        assert_eq!(first_total, 1500);

        // A retransmit followed by a leaderboard request: the very next
        // packet to Alice must be the snapshot, with no second ack, no
        // error, and an unchanged score.
        h.submit(1, 1, 1, 0.0);
        h.send(SessionCommand::Leaderboard {
            addr: player_addr(1),
        });

        let (packet, _) = h.next().await;
        match packet {
            Packet::LeaderboardUpdate { leaderboard } => {
                assert_eq!(leaderboard[0].nickname, "Alice");
                assert_eq!(leaderboard[0].score, first_total);
            }
            other => panic!("expected leaderboard snapshot, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle_single_question() {
        let mut h = Harness::spawn(fixture_questions(1, 20.0));

        h.join(1, "Alice");
        h.join(2, "Bob");
        h.send(SessionCommand::Start {
            addr: player_addr(1),
        });

        let (starting, _) = h
            .next_matching(|p| matches!(p, Packet::GameStarting { .. }))
            .await;
        assert!(matches!(
            starting,
            Packet::GameStarting { total_questions: 1 }
        ));

        let (question, targets) = h
            .next_matching(|p| matches!(p, Packet::QuestionStart { .. }))
            .await;
        assert_eq!(targets.len(), 2);
        match question {
            Packet::QuestionStart {
                question_number,
                question_id,
                time_limit_seconds,
                ..
            } => {
                assert_eq!(question_number, 1);
                assert_eq!(question_id, 1);
                assert_eq!(time_limit_seconds, 20.0);
            }
            _ => unreachable!(),
        }

        // Both answer correctly with the same elapsed time: a score tie,
        // broken by join order.
        h.submit(1, 1, 1, 5.0);
        h.submit(2, 1, 1, 5.0);

        let (reveal, _) = h
            .next_matching(|p| matches!(p, Packet::AnswerReveal { .. }))
            .await;
        assert!(matches!(
            reveal,
            Packet::AnswerReveal {
                correct_option_index: 1,
                ..
            }
        ));

        let (board, _) = h
            .next_matching(|p| matches!(p, Packet::LeaderboardShow { .. }))
            .await;
        match board {
            Packet::LeaderboardShow {
                leaderboard,
                question_number,
                total_questions,
            } => {
                assert_eq!(question_number, 1);
                assert_eq!(total_questions, 1);
                assert_eq!(leaderboard.len(), 2);
                assert_eq!(leaderboard[0].nickname, "Alice");
                assert_eq!(leaderboard[1].nickname, "Bob");
                assert_eq!(leaderboard[0].score, leaderboard[1].score);
                assert_eq!(leaderboard[0].score, 1375);
            }
            _ => unreachable!(),
        }

        // Only one question loaded, so the leaderboard delay leads to the
        // final roster.
        let (finished, _) = h
            .next_matching(|p| matches!(p, Packet::GameFinished { .. }))
            .await;
        match finished {
            Packet::GameFinished { leaderboard } => {
                assert_eq!(leaderboard[0].nickname, "Alice");
                assert_eq!(leaderboard[1].nickname, "Bob");
            }
            _ => unreachable!(),
        }

        // Retention window elapses; the session reports itself for removal.
        loop {
            match h.server_rx.recv().await.expect("server channel closed") {
                ServerMessage::SessionExpired { game_code, members } => {
                    assert_eq!(game_code, "TEST01");
                    assert_eq!(members.len(), 2);
                    break;
                }
                _ => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_advances_through_multiple_questions() {
        let mut h = Harness::spawn(fixture_questions(2, 20.0));

        h.join(1, "Alice");
        h.send(SessionCommand::Start {
            addr: player_addr(1),
        });

        let (first, _) = h
            .next_matching(|p| matches!(p, Packet::QuestionStart { .. }))
            .await;
        match first {
            Packet::QuestionStart { question_id, .. } => {
                h.submit(1, question_id, 1, 1.0)
            }
            _ => unreachable!(),
        }

        let (second, _) = h
            .next_matching(|p| matches!(p, Packet::QuestionStart { .. }))
            .await;
        match second {
            Packet::QuestionStart {
                question_number,
                question_id,
                ..
            } => {
                assert_eq!(question_number, 2);
                assert_eq!(question_id, 2);
            }
            _ => unreachable!(),
        }

        // An answer for the first question is now a mismatch.
        h.submit(1, 1, 1, 1.0);
        let (packet, _) = h
            .next_matching(|p| matches!(p, Packet::Error { .. }))
            .await;
        assert!(matches!(
            packet,
            Packet::Error {
                kind: ErrorKind::Validation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_status_reports_phase_and_progress() {
        let mut h = Harness::spawn(fixture_questions(3, 20.0));

        h.join(1, "Alice");
        h.send(SessionCommand::Status {
            addr: player_addr(9),
        });

        let (packet, targets) = h
            .next_matching(|p| matches!(p, Packet::GameStatusResponse { .. }))
            .await;
        assert_eq!(targets, vec![player_addr(9)]);
        match packet {
            Packet::GameStatusResponse {
                game_code,
                phase,
                player_count,
                current_question,
                total_questions,
            } => {
                assert_eq!(game_code, "TEST01");
                assert_eq!(phase, Phase::Waiting);
                assert_eq!(player_count, 1);
                assert_eq!(current_question, 0);
                assert_eq!(total_questions, 3);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_leaderboard_snapshot_truncates_to_ten() {
        let mut h = Harness::spawn(fixture_questions(1, 20.0));

        for i in 0..12 {
            h.join(i, &format!("player{}", i));
        }
        h.send(SessionCommand::Leaderboard {
            addr: player_addr(0),
        });

        let (packet, _) = h
            .next_matching(|p| matches!(p, Packet::LeaderboardUpdate { .. }))
            .await;
        match packet {
            Packet::LeaderboardUpdate { leaderboard } => {
                assert_eq!(leaderboard.len(), LEADERBOARD_SNAPSHOT_LEN);
                // All scores are zero, so join order is preserved.
                assert_eq!(leaderboard[0].nickname, "player0");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_leaderboard_sorts_descending_with_stable_ties() {
        let mut players = Vec::new();
        for (i, (name, score)) in [("Alice", 1200), ("Bob", 1500), ("Carol", 1200)]
            .iter()
            .enumerate()
        {
            players.push(Player {
                id: i as u32 + 1,
                addr: player_addr(i as u16),
                nickname: name.to_string(),
                score: *score,
                answers: HashMap::new(),
            });
        }

        let entries = leaderboard(&players, None);
        assert_eq!(entries[0].nickname, "Bob");
        assert_eq!(entries[1].nickname, "Alice");
        assert_eq!(entries[2].nickname, "Carol");

        let truncated = leaderboard(&players, Some(2));
        assert_eq!(truncated.len(), 2);
    }
}

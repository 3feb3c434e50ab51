use serde::{Deserialize, Serialize};

/// Maximum players allowed in a single game while it is waiting for more.
pub const MAX_PLAYERS: usize = 50;
/// Longest accepted nickname, in characters.
pub const MAX_NICKNAME_LEN: usize = 20;
/// Length of a game code (uppercase alphanumeric).
pub const GAME_CODE_LEN: usize = 6;

/// Delay between "game starting" and the first question, in seconds.
pub const STARTING_DELAY_SECS: f32 = 3.0;
/// How long the correct answer stays on screen before the leaderboard.
pub const REVEAL_DELAY_SECS: f32 = 3.0;
/// How long the leaderboard stays up before the next question (or the end).
pub const LEADERBOARD_DELAY_SECS: f32 = 5.0;
/// How long a finished game remains queryable before it is destroyed.
pub const RETENTION_SECS: f32 = 60.0;

/// Points awarded for any correct answer before the speed bonus.
pub const BASE_SCORE: u32 = 1000;
/// Maximum speed bonus, earned by answering instantly.
pub const MAX_TIME_BONUS: u32 = 500;
/// Entries returned by an on-demand leaderboard snapshot.
pub const LEADERBOARD_SNAPSHOT_LEN: usize = 10;

/// A single quiz question. Immutable once the bank is loaded; each game
/// takes its own copy of the bank at creation.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Question {
    pub id: u32,
    pub prompt: String,
    pub options: [String; 4],
    pub correct_option_index: u8,
    pub time_limit_seconds: f32,
}

/// Lifecycle state of one game session.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Starting,
    Question,
    AnswerReveal,
    Leaderboard,
    Finished,
}

/// Category of a rejected command, reported back to the sender only.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown game code.
    NotFound,
    /// Command not valid in the session's current phase.
    InvalidPhase,
    /// Roster is full.
    Capacity,
    /// Malformed or mismatched command payload.
    Validation,
}

/// One row of a leaderboard broadcast or snapshot.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub nickname: String,
    pub score: u32,
}

/// Wire protocol between clients and the server, bincode-encoded over UDP.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // Client -> server
    CreateGame,
    GameStatus {
        game_code: String,
    },
    JoinGame {
        game_code: String,
        nickname: String,
    },
    StartGame {
        game_code: String,
    },
    SubmitAnswer {
        game_code: String,
        question_id: u32,
        answer_index: u8,
        elapsed_seconds: f32,
    },
    GetLeaderboard {
        game_code: String,
    },
    /// Keeps a joined connection alive between commands.
    Heartbeat,
    /// Explicit disconnect.
    Leave,

    // Server -> client
    GameCreated {
        game_code: String,
    },
    GameStatusResponse {
        game_code: String,
        phase: Phase,
        player_count: usize,
        current_question: usize,
        total_questions: usize,
    },
    JoinedGame {
        game_code: String,
        nickname: String,
        player_id: u32,
    },
    PlayerJoined {
        nickname: String,
        player_count: usize,
    },
    PlayerLeft {
        nickname: String,
        player_count: usize,
    },
    GameStarting {
        total_questions: usize,
    },
    /// Question broadcast; the correct index is withheld until the reveal.
    QuestionStart {
        question_number: usize,
        total_questions: usize,
        question_id: u32,
        prompt: String,
        options: [String; 4],
        time_limit_seconds: f32,
    },
    /// Unicast acknowledgment to the submitting player only.
    AnswerSubmitted {
        correct: bool,
        points_awarded: u32,
        total_score: u32,
    },
    AnswerReveal {
        correct_option_index: u8,
        explanation: String,
    },
    LeaderboardShow {
        leaderboard: Vec<LeaderboardEntry>,
        question_number: usize,
        total_questions: usize,
    },
    /// On-demand top-10 snapshot, unicast to the requester.
    LeaderboardUpdate {
        leaderboard: Vec<LeaderboardEntry>,
    },
    GameFinished {
        leaderboard: Vec<LeaderboardEntry>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

/// Points for a correct answer: a flat base plus a speed bonus that decays
/// linearly from `MAX_TIME_BONUS` at zero elapsed to nothing at the time
/// limit. Answers slower than the limit still earn the base; the bonus
/// floors at zero rather than going negative. The reported elapsed time is
/// not otherwise clamped (it is client-supplied and trusted), so a negative
/// value can inflate the bonus arbitrarily; the result saturates at
/// `u32::MAX` instead of overflowing.
pub fn calculate_score(elapsed_seconds: f32, time_limit_seconds: f32) -> u32 {
    let remaining =
        (1.0 - f64::from(elapsed_seconds) / f64::from(time_limit_seconds)).max(0.0);
    let bonus = (remaining * f64::from(MAX_TIME_BONUS)).floor() as u32;
    BASE_SCORE.saturating_add(bonus)
}

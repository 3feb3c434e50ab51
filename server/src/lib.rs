//! # Quiz Game Server Library
//!
//! This library provides the authoritative server implementation for timed,
//! synchronous multiplayer quiz games. Many independent games run at once,
//! each advancing a shared question sequence in lockstep for all of its
//! participants, with the server owning all scoring and deadlines.
//!
//! ## Architecture Design
//!
//! ### A Task Per Session
//! Every live game runs as its own tokio task owning all of the game's
//! mutable state. Commands addressed to a game are routed to its task over
//! an mpsc channel and processed strictly in order, so concurrent answer
//! submissions, disconnects and timer expirations can never interleave in
//! the middle of a phase transition. Different games share nothing but the
//! registry map, so they proceed fully in parallel.
//!
//! ### Deadline-Driven Phase Machine
//! A game moves through `WAITING → STARTING → QUESTION → ANSWER_REVEAL →
//! LEADERBOARD → (QUESTION | FINISHED)`. Each auto-advancing phase arms a
//! single pending deadline inside the session task's select loop; arming a
//! new one replaces the old, and a deadline that fires after the phase has
//! already moved on is discarded. The race between "time expired" and
//! "everyone answered" therefore resolves to whichever event the task sees
//! first, exactly once.
//!
//! ### UDP-Based Communication
//! Clients talk to the server with bincode-encoded packets over a single
//! UDP socket. A receiver task feeds inbound packets to the dispatch loop;
//! session tasks queue unicasts and member broadcasts to a sender task.
//! Since UDP has no connection teardown, a connection table tracks joined
//! addresses and a periodic checker disconnects the ones that go silent.
//!
//! ## Module Organization
//!
//! - [`session`]: the game session state machine, player and answer
//!   records, leaderboard computation; the core of the crate.
//! - [`registry`]: game-code generation and the code-to-session map.
//! - [`network`]: UDP socket handling, packet dispatch, outbound fan-out.
//! - [`connections`]: joined-connection liveness tracking.
//! - [`questions`]: the built-in question bank.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use server::questions;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server =
//!         Server::new("127.0.0.1:8080", questions::default_question_bank()).await?;
//!     server.run().await
//! }
//! ```

pub mod connections;
pub mod network;
pub mod questions;
pub mod registry;
pub mod session;

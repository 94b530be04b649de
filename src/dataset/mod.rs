//! Conversation datasets: records, candidate-list codec and file I/O.

pub mod codec;
mod conversation;
pub mod io;

pub use conversation::{label_counts, labels, Conversation, Turn, ASSISTANT_ROLE, USER_ROLE};
pub use io::{load_dataset, read_json, save_dataset, write_json};

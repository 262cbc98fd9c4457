//! Request routing: intent classification, the conversational responder and
//! the dispatcher that turns one question into one unified response.

pub mod chat;
pub mod intent;
pub mod router;

pub use chat::ChatResponder;
pub use intent::{classify, ClassifierScores, Intent};
pub use router::{QueryRouter, RoutedResponse, RouterConfig, HYBRID_INCOMPLETE};

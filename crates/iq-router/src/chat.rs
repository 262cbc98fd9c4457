use iq_llm::ChatModel;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const CHAT_RATE_LIMITED: &str =
    "I'm receiving too many requests right now. Please wait a moment and try again.";
pub const CHAT_FAILED: &str = "I encountered an error processing your message. Please try again.";
pub const GREETING_FALLBACK: &str = "Hello! I'm your business intelligence assistant. \
I can help you query databases with plain English, analyze uploaded documents, \
and generate charts and insights. How can I assist you today?";

const PERSONA: &str = "You are a professional AI business intelligence assistant built for enterprise analytics.\n\n\
Your capabilities:\n\
- Analyze SQL databases (MySQL, PostgreSQL, SQLite) using natural language\n\
- Answer questions about uploaded documents (PDF, Word, text, HTML)\n\
- Generate data insights, business metrics, and interactive charts\n\
- Provide strategic business recommendations based on data patterns\n\
- Answer general business and analytics questions conversationally\n\n\
Your personality:\n\
- Professional, clear, and precise\n\
- Proactively suggest next steps or follow-up queries\n\
- When you don't have data context, explain what you can do and ask the user to connect a database or upload a document\n\
- Never fabricate data; be transparent about what you know and what requires a database query\n\n\
Format guidelines:\n\
- Use bullet points for lists\n\
- Keep answers concise but complete\n\
- For greetings, be warm and briefly introduce your capabilities";

const GREETING_INSTRUCTION: &str = "The user just greeted you. Respond warmly in 2-3 sentences, \
introduce yourself, and briefly mention 2-3 key things you can help with. Be concise and inviting.";

/// Conversational answers for greetings and general questions. Never fails.
pub struct ChatResponder {
    chat: Arc<dyn ChatModel>,
    greeting_system: String,
}

impl ChatResponder {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self {
            chat,
            greeting_system: format!("{PERSONA}\n\n{GREETING_INSTRUCTION}"),
        }
    }

    pub async fn greet(&self, message: &str) -> String {
        match self.chat.chat(&self.greeting_system, "", message).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "greeting fell back to canned reply");
                GREETING_FALLBACK.to_string()
            }
        }
    }

    pub async fn respond(&self, message: &str) -> String {
        match self.chat.chat(PERSONA, "", message).await {
            Ok(answer) => {
                info!("chat responder answered");
                answer
            }
            Err(e) if e.is_rate_limited() => {
                warn!(error = %e, "chat responder rate limited");
                CHAT_RATE_LIMITED.to_string()
            }
            Err(e) => {
                error!(error = %e, "chat responder failed");
                CHAT_FAILED.to_string()
            }
        }
    }
}

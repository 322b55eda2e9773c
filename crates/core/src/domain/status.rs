use serde::{Deserialize, Serialize};

/// Fields of the process-wide status a user can ask about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusField {
    Doing,
    Thinking,
    WantReply,
    WantSendMore,
}

impl StatusField {
    /// Question phrases that select each field, checked in this order.
    pub const QUESTIONS: [(&'static str, StatusField); 4] = [
        ("做什么", StatusField::Doing),
        ("想什么", StatusField::Thinking),
        ("想不想回复", StatusField::WantReply),
        ("要不要补充发送消息", StatusField::WantSendMore),
    ];

    pub fn from_question(text: &str) -> Option<Self> {
        Self::QUESTIONS.iter().find(|(phrase, _)| text.contains(phrase)).map(|(_, field)| *field)
    }

    pub fn phrase(self) -> &'static str {
        match self {
            Self::Doing => "做什么",
            Self::Thinking => "想什么",
            Self::WantReply => "想不想回复",
            Self::WantSendMore => "要不要补充发送消息",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotStatus {
    pub doing: String,
    pub thinking: String,
    pub want_reply: bool,
    pub want_send_more: bool,
}

impl Default for BotStatus {
    fn default() -> Self {
        Self {
            doing: "idle".to_owned(),
            thinking: String::new(),
            want_reply: true,
            want_send_more: false,
        }
    }
}

impl BotStatus {
    pub fn describe(&self, field: StatusField) -> String {
        match field {
            StatusField::Doing => format!("{}? {}", field.phrase(), self.doing),
            StatusField::Thinking => format!("{}? {}", field.phrase(), self.thinking),
            StatusField::WantReply => format!("我想回复吗？ {}", yes_no(self.want_reply)),
            StatusField::WantSendMore => {
                format!("我想补充发送消息吗？ {}", yes_no(self.want_send_more))
            }
        }
    }

    pub fn begin_thinking(&mut self, body: &str) {
        self.doing = "replying".to_owned();
        self.thinking = format!("thinking about: {body}");
    }

    pub fn settle(&mut self) {
        self.doing = "idle".to_owned();
        self.thinking.clear();
        self.want_send_more = false;
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "是"
    } else {
        "否"
    }
}

/// Why a stream finished normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(UnknownFinishReason),
}

/// A finish reason outside the known set. Only built by
/// [`FinishReason::parse`], so it never holds a known value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFinishReason(String);

impl UnknownFinishReason {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FinishReason {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ContentFilter => "content-filter",
            Self::Other(value) => value.as_str(),
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "content-filter" => Self::ContentFilter,
            other => Self::Other(UnknownFinishReason(other.to_string())),
        }
    }
}

/// One unit of the streaming protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Start,
    TextDelta(String),
    ReasoningDelta(String),
    Error(String),
    Finish(FinishReason),
}

impl Frame {
    pub const START_TAG: char = 'f';
    pub const TEXT_TAG: char = '0';
    pub const REASONING_TAG: char = 'e';
    pub const ERROR_TAG: char = '3';
    pub const FINISH_TAG: char = 'd';

    #[must_use]
    pub fn tag(&self) -> char {
        match self {
            Self::Start => Self::START_TAG,
            Self::TextDelta(_) => Self::TEXT_TAG,
            Self::ReasoningDelta(_) => Self::REASONING_TAG,
            Self::Error(_) => Self::ERROR_TAG,
            Self::Finish(_) => Self::FINISH_TAG,
        }
    }

    /// Terminal frames end a stream; nothing may follow them.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Finish(_))
    }

    #[must_use]
    pub fn stop() -> Self {
        Self::Finish(FinishReason::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::{FinishReason, Frame};

    #[test]
    fn finish_reason_parse_keeps_unknown_values() {
        assert_eq!(FinishReason::parse("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("content-filter"), FinishReason::ContentFilter);
        assert!(matches!(
            FinishReason::parse("tool-calls"),
            FinishReason::Other(ref value) if value.as_str() == "tool-calls"
        ));
        assert_eq!(FinishReason::parse("x").as_str(), "x");
    }

    #[test]
    fn every_finish_reason_reparses_to_itself() {
        for value in ["stop", "length", "content-filter", "tool-calls", ""] {
            let reason = FinishReason::parse(value);
            assert_eq!(FinishReason::parse(reason.as_str()), reason);
        }
    }

    #[test]
    fn only_error_and_finish_are_terminal() {
        assert!(!Frame::Start.is_terminal());
        assert!(!Frame::TextDelta(String::new()).is_terminal());
        assert!(!Frame::ReasoningDelta(String::new()).is_terminal());
        assert!(Frame::Error("boom".to_string()).is_terminal());
        assert!(Frame::stop().is_terminal());
    }
}

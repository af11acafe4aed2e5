/// Begin/end marker pairs that delimit inline reasoning in provider text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningMarkers {
    pairs: Vec<(String, String)>,
}

impl Default for ReasoningMarkers {
    fn default() -> Self {
        Self::none()
            .with_pair("<thinking>", "</thinking>")
            .with_pair("<think>", "</think>")
    }
}

impl ReasoningMarkers {
    /// No inline markers; only provider-declared reasoning is recognised.
    #[must_use]
    pub fn none() -> Self {
        Self { pairs: Vec::new() }
    }

    #[must_use]
    pub fn with_pair(mut self, begin: impl Into<String>, end: impl Into<String>) -> Self {
        let (begin, end) = (begin.into(), end.into());
        if !begin.is_empty() && !end.is_empty() {
            self.pairs.push((begin, end));
        }
        self
    }

    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    // Earliest begin marker in `text`: (byte offset, begin length, end marker).
    fn find_begin(&self, text: &str) -> Option<(usize, usize, &str)> {
        self.pairs
            .iter()
            .filter_map(|(begin, end)| text.find(begin.as_str()).map(|index| (index, begin.len(), end.as_str())))
            .min_by_key(|(index, _, _)| *index)
    }

    // Length of the longest suffix of `text` that could still grow into a
    // begin marker.
    fn partial_begin_suffix(&self, text: &str) -> usize {
        let longest = self
            .pairs
            .iter()
            .map(|(begin, _)| begin.len().saturating_sub(1))
            .max()
            .unwrap_or(0);

        (1..=longest.min(text.len()))
            .rev()
            .find(|len| {
                let start = text.len() - len;
                text.is_char_boundary(start)
                    && self
                        .pairs
                        .iter()
                        .any(|(begin, _)| begin.starts_with(&text[start..]))
            })
            .unwrap_or(0)
    }
}

/// Text routed to one frame kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitOutput {
    Text(String),
    Reasoning(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SplitState {
    Outside,
    Inside { end: String },
}

/// Splits a delta stream into answer text and reasoning.
///
/// Plain text is released immediately, except for a trailing fragment that
/// may be the start of a marker split across deltas. Marker-delimited
/// reasoning is held until its end marker arrives, so a marker is never
/// forwarded as text. Provider-declared reasoning passes straight through.
#[derive(Debug, Clone)]
pub struct ReasoningSplitter {
    markers: ReasoningMarkers,
    state: SplitState,
    pending: String,
}

impl ReasoningSplitter {
    #[must_use]
    pub fn new(markers: ReasoningMarkers) -> Self {
        Self {
            markers,
            state: SplitState::Outside,
            pending: String::new(),
        }
    }

    #[must_use]
    pub fn in_reasoning(&self) -> bool {
        matches!(self.state, SplitState::Inside { .. })
    }

    pub fn push_text(&mut self, delta: &str) -> Vec<SplitOutput> {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.push_str(delta);
        let mut outputs = Vec::new();

        loop {
            match &self.state {
                SplitState::Outside => {
                    if let Some((index, begin_len, end)) = self.markers.find_begin(&buffer) {
                        let end = end.to_string();
                        push_non_empty(&mut outputs, SplitOutput::Text(buffer[..index].to_string()));
                        buffer.drain(..index + begin_len);
                        self.state = SplitState::Inside { end };
                        continue;
                    }

                    let held = self.markers.partial_begin_suffix(&buffer);
                    self.pending = buffer.split_off(buffer.len() - held);
                    push_non_empty(&mut outputs, SplitOutput::Text(buffer));
                    return outputs;
                }
                SplitState::Inside { end } => {
                    let Some(index) = buffer.find(end.as_str()) else {
                        self.pending = buffer;
                        return outputs;
                    };
                    let end_len = end.len();
                    push_non_empty(&mut outputs, SplitOutput::Reasoning(buffer[..index].to_string()));
                    buffer.drain(..index + end_len);
                    self.state = SplitState::Outside;
                }
            }
        }
    }

    /// Reasoning the provider labelled as such. Any held-back text fragment
    /// is released first to keep ordering.
    pub fn push_reasoning(&mut self, delta: &str) -> Vec<SplitOutput> {
        let mut outputs = Vec::new();
        if matches!(self.state, SplitState::Outside) {
            push_non_empty(&mut outputs, SplitOutput::Text(std::mem::take(&mut self.pending)));
        }
        push_non_empty(&mut outputs, SplitOutput::Reasoning(delta.to_string()));
        outputs
    }

    /// Releases whatever is still held. An unterminated reasoning block is
    /// released as reasoning without its marker.
    pub fn finish(&mut self) -> Vec<SplitOutput> {
        let pending = std::mem::take(&mut self.pending);
        let state = std::mem::replace(&mut self.state, SplitState::Outside);
        let mut outputs = Vec::new();
        match state {
            SplitState::Outside => push_non_empty(&mut outputs, SplitOutput::Text(pending)),
            SplitState::Inside { .. } => push_non_empty(&mut outputs, SplitOutput::Reasoning(pending)),
        }
        outputs
    }
}

fn push_non_empty(outputs: &mut Vec<SplitOutput>, output: SplitOutput) {
    let empty = match &output {
        SplitOutput::Text(text) | SplitOutput::Reasoning(text) => text.is_empty(),
    };
    if !empty {
        outputs.push(output);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn text(value: &str) -> SplitOutput {
        SplitOutput::Text(value.to_string())
    }

    fn reasoning(value: &str) -> SplitOutput {
        SplitOutput::Reasoning(value.to_string())
    }

    fn run(deltas: &[&str]) -> Vec<SplitOutput> {
        let mut splitter = ReasoningSplitter::new(ReasoningMarkers::default());
        let mut outputs: Vec<SplitOutput> = deltas
            .iter()
            .flat_map(|delta| splitter.push_text(delta))
            .collect();
        outputs.extend(splitter.finish());
        outputs
    }

    #[test]
    fn plain_text_is_released_per_delta() {
        let mut splitter = ReasoningSplitter::new(ReasoningMarkers::default());
        assert_eq!(splitter.push_text("Hello "), vec![text("Hello ")]);
        assert_eq!(splitter.push_text("world"), vec![text("world")]);
        assert!(splitter.finish().is_empty());
    }

    #[test]
    fn reasoning_is_held_until_closing_marker() {
        let mut splitter = ReasoningSplitter::new(ReasoningMarkers::default());
        assert_eq!(splitter.push_text("Hi <thinking>step one"), vec![text("Hi ")]);
        assert!(splitter.in_reasoning());
        assert!(splitter.push_text(", step two").is_empty());
        assert_eq!(
            splitter.push_text("</thinking>Answer"),
            vec![reasoning("step one, step two"), text("Answer")]
        );
    }

    #[test]
    fn markers_split_across_deltas_are_detected() {
        assert_eq!(
            run(&["A <thi", "nk", "ing>plan</thin", "king> B"]),
            vec![text("A "), reasoning("plan"), text(" B")]
        );
        assert_eq!(
            run(&["<", "think>x</think>", "done"]),
            vec![reasoning("x"), text("done")]
        );
    }

    #[test]
    fn lookalike_prefix_is_released_once_disproved() {
        let mut splitter = ReasoningSplitter::new(ReasoningMarkers::default());
        assert_eq!(splitter.push_text("a <th"), vec![text("a ")]);
        assert_eq!(splitter.push_text("e end"), vec![text("<the end")]);
    }

    #[test]
    fn unterminated_reasoning_is_flushed_without_marker() {
        assert_eq!(run(&["ok <think>never closed"]), vec![text("ok "), reasoning("never closed")]);
        assert_eq!(run(&["trailing <thin"]), vec![text("trailing "), text("<thin")]);
    }

    #[test]
    fn declared_reasoning_passes_through_in_order() {
        let mut splitter = ReasoningSplitter::new(ReasoningMarkers::default());
        assert_eq!(splitter.push_text("x <"), vec![text("x ")]);
        assert_eq!(splitter.push_reasoning("why"), vec![text("<"), reasoning("why")]);
    }

    #[test]
    fn no_markers_means_no_holdback() {
        let mut splitter = ReasoningSplitter::new(ReasoningMarkers::none());
        assert_eq!(splitter.push_text("<thinking>raw"), vec![text("<thinking>raw")]);
    }

    #[test]
    fn multibyte_text_near_marker_boundary_is_safe() {
        assert_eq!(
            run(&["caf\u{e9}<", "think>\u{1f914}</think>\u{e9}"]),
            vec![text("caf\u{e9}"), reasoning("\u{1f914}"), text("\u{e9}")]
        );
    }
}

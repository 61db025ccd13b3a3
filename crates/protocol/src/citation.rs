use std::fmt;

/// Citation reference as written inside answer text, e.g. `guide.pdf#page=4`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CitationKey {
    raw: String,
    path: String,
    fragment: Option<String>,
}

impl CitationKey {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into().trim().to_string();
        let (path, fragment) = match raw.split_once('#') {
            Some((path, fragment)) if !fragment.is_empty() => {
                (path.to_string(), Some(fragment.to_string()))
            }
            Some((path, _)) => (path.to_string(), None),
            None => (raw.clone(), None),
        };

        Self {
            raw,
            path,
            fragment,
        }
    }

    /// Full reference including any fragment; this is the cache identity.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Artifact path served by the content endpoint, fragment removed.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn extension(&self) -> Option<String> {
        let (_, extension) = self.path.rsplit_once('.')?;
        if extension.is_empty() || extension.contains('/') {
            return None;
        }
        Some(extension.to_ascii_lowercase())
    }
}

impl fmt::Display for CitationKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerFragment {
    Text(String),
    /// `number` is the 1-based position of the citation in `ParsedAnswer::citations`.
    Citation { number: usize, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedAnswer {
    pub fragments: Vec<AnswerFragment>,
    pub citations: Vec<String>,
    pub followup_questions: Vec<String>,
}

/// Splits answer text into text and `[citation]` fragments.
///
/// `<<question>>` suggestions are pulled out into `followup_questions`. While
/// `streaming`, an unterminated trailing `[` is cut so half-written citations
/// are not surfaced.
pub fn parse_answer(text: &str, streaming: bool) -> ParsedAnswer {
    let (body, followup_questions) = extract_followup_questions(text);
    let body = body.trim();
    let body = if streaming {
        truncate_open_citation(body)
    } else {
        body
    };

    let mut parsed = ParsedAnswer {
        followup_questions,
        ..ParsedAnswer::default()
    };
    let mut cursor = body;

    while let Some(open) = cursor.find('[') {
        let tail = &cursor[open + 1..];
        let Some(close) = tail.find(']') else {
            break;
        };

        let candidate = &tail[..close];
        if candidate.is_empty() {
            push_text(&mut parsed.fragments, &cursor[..open + 2]);
            cursor = &tail[close + 1..];
            continue;
        }

        push_text(&mut parsed.fragments, &cursor[..open]);
        let number = match parsed.citations.iter().position(|known| known == candidate) {
            Some(index) => index + 1,
            None => {
                parsed.citations.push(candidate.to_string());
                parsed.citations.len()
            }
        };
        parsed.fragments.push(AnswerFragment::Citation {
            number,
            key: candidate.to_string(),
        });
        cursor = &tail[close + 1..];
    }

    push_text(&mut parsed.fragments, cursor);
    parsed
}

fn extract_followup_questions(text: &str) -> (String, Vec<String>) {
    let mut body = String::with_capacity(text.len());
    let mut questions = Vec::new();
    let mut cursor = text;

    while let Some(open) = cursor.find("<<") {
        body.push_str(&cursor[..open]);
        let tail = &cursor[open + 2..];
        let Some(close) = tail.find(">>") else {
            // Unterminated suggestion: everything after it is still being generated.
            return (body, questions);
        };

        let question = tail[..close].trim();
        if !question.is_empty() {
            questions.push(question.to_string());
        }
        cursor = &tail[close + 2..];
    }

    body.push_str(cursor);
    (body, questions)
}

fn truncate_open_citation(text: &str) -> &str {
    match (text.rfind('['), text.rfind(']')) {
        (Some(open), Some(close)) if open > close => &text[..open],
        (Some(open), None) => &text[..open],
        _ => text,
    }
}

fn push_text(fragments: &mut Vec<AnswerFragment>, text: &str) {
    if text.is_empty() {
        return;
    }

    if let Some(AnswerFragment::Text(previous)) = fragments.last_mut() {
        previous.push_str(text);
    } else {
        fragments.push(AnswerFragment::Text(text.to_string()));
    }
}

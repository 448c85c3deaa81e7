//! Pulls JSON out of free-form model replies.
//!
//! Grammar, one line at a time:
//! - an opening fence is a line whose content (after leading whitespace) is
//!   three or more backticks followed by an info string without backticks;
//!   the first word of the info string is the language tag;
//! - the block closes at the first line that is only a run of at least as
//!   many backticks (surrounding whitespace ignored);
//! - an unterminated block is dropped.

const FENCE: char = '`';
const MIN_FENCE_LEN: usize = 3;

struct OpenFence<'a> {
    len: usize,
    is_json: bool,
    body: Vec<&'a str>,
}

impl<'a> OpenFence<'a> {
    fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim_start();
        let len = trimmed.chars().take_while(|&c| c == FENCE).count();
        if len < MIN_FENCE_LEN {
            return None;
        }

        let info = trimmed[len..].trim();
        if info.contains(FENCE) {
            return None;
        }

        let language = info.split_whitespace().next().unwrap_or("");
        Some(Self {
            len,
            is_json: language.eq_ignore_ascii_case("json"),
            body: Vec::new(),
        })
    }

    fn is_closed_by(&self, line: &str) -> bool {
        let trimmed = line.trim();
        trimmed.len() >= self.len && trimmed.chars().all(|c| c == FENCE)
    }
}

/// Bodies of every ```json block in `text`, in order of appearance.
/// Returns an empty vec when there are none.
pub fn extract_json_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut open: Option<OpenFence> = None;

    for line in text.lines() {
        let Some(fence) = open.as_mut() else {
            open = OpenFence::parse(line);
            continue;
        };

        if fence.is_closed_by(line) {
            if fence.is_json {
                blocks.push(fence.body.join("\n"));
            }
            open = None;
        } else {
            fence.body.push(line);
        }
    }

    blocks
}

/// First ```json block, if any.
pub fn first_json_block(text: &str) -> Option<String> {
    extract_json_blocks(text).into_iter().next()
}

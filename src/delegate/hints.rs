// Hint extraction from inbound free text
//
// Recognized, in extraction order:
//   {"tool": "weather", "args": {...}}   embedded JSON override blocks
//   [target: east]  or  [server: east]   alternate server hint
//   [inputs: weather: paris; notify: hi] named inputs
//   [port: 8081]                         preferred endpoint port

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*(?:target|server)\s*:\s*([^\]\s]+)\s*\]").unwrap()
});

static INPUTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[\s*inputs\s*:([^\]]*)\]").unwrap());

static PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[\s*port\s*:\s*(\d{1,5})\s*\]").unwrap());

/// Hints pulled out of one inbound message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hints {
    pub json_blocks: Vec<Map<String, Value>>,
    pub target: Option<String>,
    /// Named inputs in message order
    pub inputs: Vec<(String, String)>,
    pub port: Option<String>,
}

impl Hints {
    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.json_blocks.is_empty()
            && self.target.is_none()
            && self.inputs.is_empty()
            && self.port.is_none()
    }
}

/// Strip all hints from `raw`, returning the remaining text and the hints
pub fn extract(raw: &str) -> (String, Hints) {
    let mut hints = Hints::default();

    let (text, blocks) = extract_json_blocks(raw);
    hints.json_blocks = blocks;

    let text = match TARGET_RE.captures(&text) {
        Some(caps) => {
            hints.target = Some(caps[1].to_string());
            TARGET_RE.replace_all(&text, " ").into_owned()
        }
        None => text,
    };

    for caps in INPUTS_RE.captures_iter(&text) {
        hints.inputs.extend(parse_inputs(&caps[1]));
    }
    let text = INPUTS_RE.replace_all(&text, " ").into_owned();

    let text = match PORT_RE.captures(&text) {
        Some(caps) => {
            hints.port = Some(caps[1].to_string());
            PORT_RE.replace_all(&text, " ").into_owned()
        }
        None => text,
    };

    (collapse_whitespace(&text), hints)
}

/// `name: text; name: text`
fn parse_inputs(body: &str) -> Vec<(String, String)> {
    body.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Find `{...}` spans that parse as JSON objects. Every `{` is a candidate
/// start; a candidate that does not parse leaves its text in place and the
/// scan resumes at the next `{`.
fn extract_json_blocks(raw: &str) -> (String, Vec<Map<String, Value>>) {
    let mut blocks = Vec::new();
    let mut kept = String::with_capacity(raw.len());
    let mut copied_to = 0;
    let mut pos = 0;

    while let Some(offset) = raw[pos..].find('{') {
        let start = pos + offset;
        let mut stream = serde_json::Deserializer::from_str(&raw[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) => {
                let end = start + stream.byte_offset();
                kept.push_str(&raw[copied_to..start]);
                kept.push(' ');
                copied_to = end;
                pos = end;
                blocks.push(map);
            }
            _ => pos = start + 1,
        }
    }
    kept.push_str(&raw[copied_to..]);

    (kept, blocks)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Legacy GML scenario import.
//!
//! Scenario files written by older tooling come in GML, a nested
//! key-value format. Only reading is supported; saves are always JSON.
//! The reader keeps the quirks those files rely on: `±INF` reals, `NAN`
//! and `INF` accepted as values after id/label/source/target keys,
//! XML-entity escapes in strings, `#…` comments, and the
//! `"_networkx_list_start"` marker forcing a single-element list.

use crate::errors::AppError;
use serde_json::{Map, Number, Value, json};

const LIST_START_VALUE: &str = "_networkx_list_start";

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Key(String),
    Real(f64),
    Int(i64),
    Str(String),
    DictStart,
    DictEnd,
}

struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Result<Self, AppError> {
        if !input.is_ascii() {
            return Err(AppError::InvalidInput(
                "GML input is not ASCII-encoded".to_string(),
            ));
        }
        Ok(Self {
            input: input.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        })
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = *self.input.get(self.pos)?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn error(&self, message: &str) -> AppError {
        AppError::InvalidInput(format!(
            "cannot parse GML at ({}, {}): {message}",
            self.line, self.column
        ))
    }

    fn next_token(&mut self) -> Result<Option<Token>, AppError> {
        loop {
            match self.peek() {
                None => return Ok(None),
                Some(b) if b.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'#') => {
                    // comment runs to end of line
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(_) => break,
            }
        }

        let byte = self.peek().unwrap();
        match byte {
            b'[' => {
                self.bump();
                Ok(Some(Token::DictStart))
            }
            b']' => {
                self.bump();
                Ok(Some(Token::DictEnd))
            }
            b'"' => {
                self.bump();
                let mut text = String::new();
                loop {
                    match self.bump() {
                        Some(b'"') => break,
                        Some(b'\n') | None => {
                            return Err(self.error("unterminated string"));
                        }
                        Some(b) => text.push(b as char),
                    }
                }
                Ok(Some(Token::Str(unescape(&text))))
            }
            b if b.is_ascii_alphabetic() => {
                // identifiers double as keys and as bare INF/NAN values
                let mut word = String::new();
                while let Some(b) = self.peek() {
                    if b.is_ascii_alphanumeric() || b == b'_' {
                        word.push(b as char);
                        self.bump();
                    } else {
                        break;
                    }
                }
                Ok(Some(Token::Key(word)))
            }
            b if b == b'+' || b == b'-' || b.is_ascii_digit() || b == b'.' => {
                self.read_number()
            }
            other => Err(self.error(&format!("unexpected character {:?}", other as char))),
        }
    }

    fn read_number(&mut self) -> Result<Option<Token>, AppError> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            self.bump();
        }
        // signed INF is a real; bare INF tokenizes as a key above
        if self.input[self.pos..].starts_with(b"INF") {
            self.pos += 3;
            let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap();
            let value = if text.starts_with('-') {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            };
            return Ok(Some(Token::Real(value)));
        }

        let mut saw_dot = false;
        let mut saw_exponent = false;
        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'9' => {
                    self.bump();
                }
                b'.' if !saw_dot && !saw_exponent => {
                    saw_dot = true;
                    self.bump();
                }
                b'E' | b'e' if !saw_exponent => {
                    saw_exponent = true;
                    self.bump();
                    if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap();
        if text.is_empty() || text == "+" || text == "-" {
            return Err(self.error("malformed number"));
        }
        if saw_dot || saw_exponent {
            text.parse::<f64>()
                .map(|v| Some(Token::Real(v)))
                .map_err(|_| self.error("malformed real"))
        } else {
            text.parse::<i64>()
                .map(|v| Some(Token::Int(v)))
                .map_err(|_| self.error("malformed integer"))
        }
    }
}

/// Replaces XML character references with the referenced characters.
fn unescape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        result.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find(';') {
            Some(end) => {
                let entity = &tail[1..end];
                let decoded = if let Some(digits) = entity.strip_prefix("#x") {
                    u32::from_str_radix(digits, 16).ok().and_then(char::from_u32)
                } else if let Some(digits) = entity.strip_prefix('#') {
                    digits.parse::<u32>().ok().and_then(char::from_u32)
                } else {
                    match entity {
                        "amp" => Some('&'),
                        "quot" => Some('"'),
                        "lt" => Some('<'),
                        "gt" => Some('>'),
                        "apos" => Some('\''),
                        _ => None,
                    }
                };
                match decoded {
                    Some(c) => {
                        result.push(c);
                        rest = &tail[end + 1..];
                    }
                    None => {
                        // unknown entity: leave unchanged
                        result.push('&');
                        rest = &tail[1..];
                    }
                }
            }
            None => {
                result.push_str(tail);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parses a run of `key value` pairs. Repeated keys accumulate into a
    /// list; single-value keys produce a scalar.
    fn parse_kv(&mut self) -> Result<Map<String, Value>, AppError> {
        let mut accumulated: Vec<(String, Vec<Value>)> = Vec::new();
        while let Some(Token::Key(_)) = self.peek() {
            let Some(Token::Key(key)) = self.next() else {
                unreachable!()
            };
            let value = match self.peek() {
                Some(Token::Real(v)) => {
                    let v = *v;
                    self.next();
                    json!(v)
                }
                Some(Token::Int(v)) => {
                    let v = *v;
                    self.next();
                    json!(v)
                }
                Some(Token::Str(s)) => {
                    let s = s.clone();
                    self.next();
                    Value::String(s)
                }
                Some(Token::DictStart) => self.parse_dict()?,
                Some(Token::Key(word)) => {
                    // NAN and INF sneak through as bare identifiers; they
                    // are only legal after these keys
                    let word = word.clone();
                    if matches!(key.as_str(), "id" | "label" | "source" | "target") {
                        self.next();
                        Value::String(word)
                    } else if word == "NAN" {
                        self.next();
                        Value::String("NaN".to_string())
                    } else if word == "INF" {
                        self.next();
                        Number::from_f64(f64::INFINITY)
                            .map(Value::Number)
                            .unwrap_or(Value::String("INF".to_string()))
                    } else {
                        return Err(AppError::InvalidInput(format!(
                            "expected a value for key {key}, found {word}"
                        )));
                    }
                }
                Some(Token::DictEnd) | None => {
                    return Err(AppError::InvalidInput(format!(
                        "expected a value for key {key}"
                    )));
                }
            };
            match accumulated.iter_mut().find(|(k, _)| *k == key) {
                Some((_, values)) => values.push(value),
                None => accumulated.push((key, vec![value])),
            }
        }

        let mut map = Map::new();
        for (key, mut values) in accumulated {
            let cleaned = if values.len() == 1 {
                values.pop().unwrap()
            } else if values.first() == Some(&Value::String(LIST_START_VALUE.to_string())) {
                Value::Array(values.split_off(1))
            } else {
                Value::Array(values)
            };
            map.insert(key, cleaned);
        }
        Ok(map)
    }

    fn parse_dict(&mut self) -> Result<Value, AppError> {
        match self.next() {
            Some(Token::DictStart) => {}
            other => {
                return Err(AppError::InvalidInput(format!(
                    "expected '[', found {other:?}"
                )));
            }
        }
        let map = self.parse_kv()?;
        match self.next() {
            Some(Token::DictEnd) => Ok(Value::Object(map)),
            other => Err(AppError::InvalidInput(format!(
                "expected ']', found {other:?}"
            ))),
        }
    }
}

/// Parses GML text into the graph object under the mandatory `graph` key.
pub fn parse_gml(input: &str) -> Result<Value, AppError> {
    let mut tokenizer = Tokenizer::new(input)?;
    let mut tokens = Vec::new();
    while let Some(token) = tokenizer.next_token()? {
        tokens.push(token);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let map = parser.parse_kv()?;
    if parser.peek().is_some() {
        return Err(AppError::InvalidInput(
            "trailing tokens after GML document".to_string(),
        ));
    }
    match map.get("graph") {
        Some(Value::Object(graph)) => Ok(Value::Object(graph.clone())),
        Some(Value::Array(_)) => Err(AppError::InvalidInput(
            "input contains more than one graph".to_string(),
        )),
        _ => Err(AppError::InvalidInput("input contains no graph".to_string())),
    }
}

/// Parses GML and coerces the node/edge lists so the result deserializes
/// into a scenario document even for single-node graphs.
pub fn parse_scenario(input: &str) -> Result<Value, AppError> {
    let mut graph = match parse_gml(input)? {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    for key in ["node", "edge"] {
        match graph.remove(key) {
            Some(Value::Array(items)) => {
                graph.insert(key.to_string(), Value::Array(items));
            }
            Some(single) => {
                graph.insert(key.to_string(), Value::Array(vec![single]));
            }
            None => {
                graph.insert(key.to_string(), Value::Array(Vec::new()));
            }
        }
    }
    Ok(Value::Object(graph))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# a scenario exported by the legacy tooling
graph [
  label "scenario_0.gml"
  node [
    id 0
    label "Empyrrean"
    map "[Core] Prime"
    mod "tavmod"
    size 100
    score [
      Arm 100.0
      Core 100.0
    ]
    capital_of "Arm"
    controlled_by "Arm"
  ]
  node [
    id 1
    label "Tempestus"
    map "[V] Sector 7"
    mod "tavmod"
    size 100
  ]
  edge [
    source 0
    target 1
  ]
]
"#;

    #[test]
    fn parses_a_scenario_graph() {
        let graph = parse_scenario(SAMPLE).unwrap();
        assert_eq!(graph["label"], "scenario_0.gml");
        let nodes = graph["node"].as_array().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0]["label"], "Empyrrean");
        assert_eq!(nodes[0]["score"]["Core"], 100.0);
        assert_eq!(nodes[0]["size"], 100);
        let edges = graph["edge"].as_array().unwrap();
        assert_eq!(edges[0]["source"], 0);
        assert_eq!(edges[0]["target"], 1);
    }

    #[test]
    fn single_node_graphs_still_produce_lists() {
        let input = r#"graph [ node [ id 3 label "Lone" ] ]"#;
        let graph = parse_scenario(input).unwrap();
        assert_eq!(graph["node"].as_array().unwrap().len(), 1);
        assert!(graph["edge"].as_array().unwrap().is_empty());
    }

    #[test]
    fn list_start_marker_forces_a_list() {
        let input = r#"graph [ tags "_networkx_list_start" tags "one" ]"#;
        let graph = parse_gml(input).unwrap();
        assert_eq!(graph["tags"], json!(["one"]));
    }

    #[test]
    fn repeated_keys_collect_into_lists() {
        let input = r#"graph [ tag "a" tag "b" lonely "c" ]"#;
        let graph = parse_gml(input).unwrap();
        assert_eq!(graph["tag"], json!(["a", "b"]));
        assert_eq!(graph["lonely"], "c");
    }

    #[test]
    fn reals_ints_and_signed_infinities() {
        let input = "graph [ a 1.5 b -2 c +INF d -INF e 3.0E+2 ]";
        let graph = parse_gml(input).unwrap();
        assert_eq!(graph["a"], 1.5);
        assert_eq!(graph["b"], -2);
        assert_eq!(graph["c"].as_f64().unwrap(), f64::INFINITY);
        assert_eq!(graph["d"].as_f64().unwrap(), f64::NEG_INFINITY);
        assert_eq!(graph["e"], 300.0);
    }

    #[test]
    fn bare_inf_allowed_after_label_keys_only() {
        let graph = parse_gml("graph [ node [ id 0 label INF ] ]").unwrap();
        assert_eq!(graph["node"]["label"], "INF");

        assert!(parse_gml("graph [ weight bogus ]").is_err());
        let graph = parse_gml("graph [ weight INF ]").unwrap();
        assert_eq!(graph["weight"].as_f64().unwrap(), f64::INFINITY);
    }

    #[test]
    fn xml_entities_are_unescaped() {
        let input = r#"graph [ name "caf&#233; &amp; bar" ]"#;
        let graph = parse_gml(input).unwrap();
        assert_eq!(graph["name"], "café & bar");
    }

    #[test]
    fn comments_and_whitespace_are_skipped() {
        let input = "graph [ # inline comment\n  a 1\n]";
        let graph = parse_gml(input).unwrap();
        assert_eq!(graph["a"], 1);
    }

    #[test]
    fn non_ascii_input_is_rejected() {
        assert!(parse_gml("graph [ a \"café\" ]").is_err());
    }

    #[test]
    fn missing_graph_key_is_an_error() {
        assert!(parse_gml("node [ id 0 ]").is_err());
    }
}

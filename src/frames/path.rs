use crate::types::ElementSnapshot;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

pub const MAIN_FRAME: &str = "main";
const INDEX_PREFIX: &str = "index=";

/// One level of a [`FramePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameSegment {
    /// `id` or `name` attribute of the frame element.
    Named(String),
    /// Position among same-level frames when neither attribute is set.
    Index(usize),
}

impl FrameSegment {
    pub fn parse(raw: &str) -> Self {
        raw.strip_prefix(INDEX_PREFIX)
            .and_then(|n| n.parse::<usize>().ok())
            .map(FrameSegment::Index)
            .unwrap_or_else(|| FrameSegment::Named(raw.to_string()))
    }
}

impl fmt::Display for FrameSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSegment::Named(name) => f.write_str(name),
            FrameSegment::Index(i) => write!(f, "{}{}", INDEX_PREFIX, i),
        }
    }
}

/// Compute the identifier of the `index`-th frame of its level: id, then name,
/// then `index=N`.
pub fn frame_identifier(frame: &ElementSnapshot, index: usize) -> FrameSegment {
    frame
        .attribute("id")
        .or_else(|| frame.attribute("name"))
        .map(|s| FrameSegment::Named(s.to_string()))
        .unwrap_or(FrameSegment::Index(index))
}

/// Slash-joined address of a frame from the top-level document.
///
/// The empty path is the top-level document and displays as `main`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FramePath {
    segments: Vec<FrameSegment>,
}

impl FramePath {
    pub fn main() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == MAIN_FRAME {
            return Self::main();
        }
        Self {
            segments: trimmed
                .split('/')
                .filter(|s| !s.is_empty())
                .map(FrameSegment::parse)
                .collect(),
        }
    }

    pub fn is_main(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[FrameSegment] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn child(&self, segment: FrameSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_main() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    pub fn last(&self) -> Option<&FrameSegment> {
        self.segments.last()
    }
}

impl fmt::Display for FramePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            return f.write_str(MAIN_FRAME);
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for FramePath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for FramePath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for FramePath {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<FramePath> for String {
    fn from(path: FramePath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: &str, name: &str) -> ElementSnapshot {
        let mut snapshot = ElementSnapshot {
            tag_name: "iframe".into(),
            ..Default::default()
        };
        snapshot.attributes.insert("id".into(), id.into());
        snapshot.attributes.insert("name".into(), name.into());
        snapshot
    }

    #[test]
    fn test_identifier_precedence() {
        assert_eq!(
            frame_identifier(&frame("ifrmSeat", "seat"), 3),
            FrameSegment::Named("ifrmSeat".into())
        );
        assert_eq!(
            frame_identifier(&frame("", "seat"), 3),
            FrameSegment::Named("seat".into())
        );
        assert_eq!(frame_identifier(&frame("", ""), 3), FrameSegment::Index(3));
        assert_eq!(
            frame_identifier(&ElementSnapshot::default(), 0),
            FrameSegment::Index(0)
        );
    }

    #[test]
    fn test_main_sentinels() {
        assert!(FramePath::parse("").is_main());
        assert!(FramePath::parse("main").is_main());
        assert_eq!(FramePath::main().to_string(), "main");
    }

    #[test]
    fn test_nested_path_display_and_segments() {
        let path = FramePath::parse("ifrmSeat/index=1/detail");
        assert_eq!(path.depth(), 3);
        assert_eq!(path.segments()[1], FrameSegment::Index(1));
        assert_eq!(path.to_string(), "ifrmSeat/index=1/detail");
        assert_eq!(path.parent().unwrap().to_string(), "ifrmSeat/index=1");
    }

    #[test]
    fn test_child_of_main() {
        let path = FramePath::main().child(FrameSegment::Named("f1".into()));
        assert_eq!(path.to_string(), "f1");
        assert_eq!(path.parent(), Some(FramePath::main()));
    }

    #[test]
    fn test_malformed_index_stays_named() {
        assert_eq!(
            FrameSegment::parse("index=abc"),
            FrameSegment::Named("index=abc".into())
        );
    }

    #[test]
    fn test_serde_as_string() {
        let path = FramePath::parse("a/b");
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"a/b\"");
        let back: FramePath = serde_json::from_str("\"main\"").unwrap();
        assert!(back.is_main());
    }
}

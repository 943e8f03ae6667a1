//! Natural-language front end: free text in, [`Command`] out.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scene_proto::Command;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::TranslateError;

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> Result<Command, TranslateError>;
}

const ROTATE_WORDS: &[&str] = &["旋转", "rotate", "turn", "spin"];
const FOCUS_WORDS: &[&str] = &[
    "聚焦", "焦点", "集中", "关注", "focus", "zoom to", "look at", "定位", "locate",
];
const ZOOM_WORDS: &[&str] = &["缩放", "放大", "缩小", "zoom", "scale", "magnify", "shrink"];
const RESET_WORDS: &[&str] = &["重置", "复位", "reset", "restore", "default", "初始", "original"];

const DEFAULT_NL_ANGLE: f64 = 30.0;

static ANGLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(?:度|°|degrees?)").expect("angle pattern"));
static SCALE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(?:倍|times|x\b)").expect("scale pattern"));
static AREA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:区域|区块|区|部分|area|part|component|组件)\s*(\d+|[一二三四五六七八九十])")
        .expect("area pattern")
});

/// Keyword translator for English and Chinese phrasing.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleTranslator;

impl RuleTranslator {
    pub fn parse(&self, text: &str) -> Option<Command> {
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return None;
        }
        let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

        if has(ROTATE_WORDS) {
            let direction = if text.contains('左') || text.contains("left") {
                "left"
            } else if text.contains('右') || text.contains("right") {
                "right"
            } else if text.contains('上') || text.contains("up") {
                "up"
            } else if text.contains('下') || text.contains("down") {
                "down"
            } else {
                "left"
            };
            let angle = capture_f64(&ANGLE, &text).unwrap_or(DEFAULT_NL_ANGLE);
            return Some(Command::rotate(direction, angle));
        }

        // Checked before zoom so "zoom to area 3" focuses.
        if has(FOCUS_WORDS) {
            return Some(Command::focus(&focus_target(&text)));
        }

        if has(ZOOM_WORDS) {
            let scale = capture_f64(&SCALE, &text).unwrap_or_else(|| {
                if ["放大", "magnify", "larger", "bigger"].iter().any(|w| text.contains(w)) {
                    2.0
                } else if ["缩小", "shrink", "smaller"].iter().any(|w| text.contains(w)) {
                    0.5
                } else {
                    1.5
                }
            });
            return Some(Command::zoom(scale));
        }

        if has(RESET_WORDS) {
            return Some(Command::reset());
        }

        None
    }
}

#[async_trait]
impl Translator for RuleTranslator {
    async fn translate(&self, text: &str) -> Result<Command, TranslateError> {
        self.parse(text).ok_or(TranslateError::NoMatch)
    }
}

fn capture_f64(pattern: &Regex, text: &str) -> Option<f64> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn focus_target(text: &str) -> String {
    if let Some(id) = AREA.captures(text).and_then(|caps| caps.get(1)) {
        let digits = match id.as_str() {
            "一" => "1",
            "二" => "2",
            "三" => "3",
            "四" => "4",
            "五" => "5",
            "六" => "6",
            "七" => "7",
            "八" => "8",
            "九" => "9",
            "十" => "10",
            other => other,
        };
        return format!("area{digits}");
    }
    if text.contains("会议") || text.contains("meeting") {
        return "meeting_room".to_string();
    }
    if text.contains("办公") || text.contains("office") {
        return "office_area".to_string();
    }
    "center".to_string()
}

/// Delegates to an external language service, falling back to the rules
/// whenever the service cannot produce a command.
pub struct RemoteTranslator {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    fallback: RuleTranslator,
}

impl RemoteTranslator {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
            api_key,
            fallback: RuleTranslator,
        }
    }

    async fn ask_service(&self, text: &str) -> Result<Command, TranslateError> {
        let mut request = self.client.post(&self.url).json(&json!({ "text": text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?.error_for_status()?;
        let body: Value = response.json().await?;
        Command::try_from(body).map_err(|e| TranslateError::Remote(e.to_string()))
    }
}

#[async_trait]
impl Translator for RemoteTranslator {
    async fn translate(&self, text: &str) -> Result<Command, TranslateError> {
        match self.ask_service(text).await {
            Ok(command) => {
                debug!(action = %command.action, "language service produced a command");
                Ok(command)
            }
            Err(err) => {
                warn!(error = %err, "language service failed; using keyword rules");
                self.fallback.translate(text).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scene_proto::{Action, ActionParams, Direction, Invocation};

    fn parse(text: &str) -> Option<ActionParams> {
        RuleTranslator
            .parse(text)
            .map(|cmd| Invocation::from_command(&cmd).params)
    }

    #[test]
    fn rotation_phrases() {
        match parse("请向左旋转模型45度") {
            Some(ActionParams::Rotate(p)) => {
                assert_eq!(p.direction, Direction::Left);
                assert_eq!(p.angle, 45.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse("Turn it right") {
            Some(ActionParams::Rotate(p)) => {
                assert_eq!(p.direction, Direction::Right);
                assert_eq!(p.angle, 30.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zoom_phrases() {
        assert!(matches!(parse("将模型放大2倍"), Some(ActionParams::Zoom(p)) if p.scale == 2.0));
        assert!(matches!(parse("对模型进行缩小操作"), Some(ActionParams::Zoom(p)) if p.scale == 0.5));
        assert!(matches!(parse("zoom 3 times"), Some(ActionParams::Zoom(p)) if p.scale == 3.0));
        assert!(matches!(parse("zoom please"), Some(ActionParams::Zoom(p)) if p.scale == 1.5));
    }

    #[test]
    fn focus_phrases() {
        let target = |text| match parse(text) {
            Some(ActionParams::Focus(p)) => p.target,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(target("聚焦到区域3"), "area3");
        assert_eq!(target("定位到区域一"), "area1");
        assert_eq!(target("zoom to area 7"), "area7");
        assert_eq!(target("聚焦会议室"), "meeting_room");
        assert_eq!(target("look at the office"), "office_area");
        assert_eq!(target("focus"), "center");
    }

    #[test]
    fn reset_and_unknown() {
        assert_eq!(parse("请重置模型视图"), Some(ActionParams::Reset));
        assert_eq!(parse("restore the default view"), Some(ActionParams::Reset));
        assert_eq!(parse("make me a sandwich"), None);
        assert_eq!(parse("   "), None);
    }

    #[tokio::test]
    async fn remote_translator_falls_back_to_rules() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let translator = RemoteTranslator::new(format!("http://{addr}/translate"), None);
        let command = translator.translate("reset").await.unwrap();
        assert_eq!(command.action, Action::Reset);
        assert!(matches!(
            translator.translate("hello").await,
            Err(TranslateError::NoMatch)
        ));
    }
}

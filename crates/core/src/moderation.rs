//! Deterministic abuse detection that runs before any inference call.

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Normal,
    Extreme,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Normal => "normal",
            Self::Extreme => "extreme",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub is_flagged: bool,
    pub severity: Severity,
}

impl Classification {
    pub const CLEAN: Self = Self { is_flagged: false, severity: Severity::None };

    fn flagged(severity: Severity) -> Self {
        Self { is_flagged: true, severity }
    }
}

/// Term and pattern tables the classifier is built from. All entries are
/// matched against lowercased text with whitespace removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifierRules {
    pub keywords: Vec<String>,
    pub patterns: Vec<String>,
    pub tuples: Vec<Vec<String>>,
    pub extreme_keywords: Vec<String>,
    pub extreme_patterns: Vec<String>,
}

const KEYWORDS: &[&str] = &[
    "傻逼", "傻b", "sb", "煞笔", "沙比", "傻比", "智障", "脑残", "白痴", "蠢货", "废物", "垃圾",
    "辣鸡", "狗屎", "死妈", "去死", "草你", "操你", "cnm", "nmsl", "弱智", "神经病", "畜生",
    "人渣", "混蛋", "破机器人", "垃圾ai", "智障机器人", "人工智障", "人工弱智", "闭嘴", "给爷死",
    "滚蛋", "fuck", "shit", "bitch", "asshole", "你全家", "你祖宗", "死全家", "全家死",
];

const PATTERNS: &[&str] = &[
    r"你.*妈.*死",
    r"你.*爸.*死",
    r"你.*全家.*死",
    r"[操草日艹].*你.*妈",
    r"去.*死",
    r"滚.*蛋",
    r"你.*[傻蠢]",
    r"你.*(sb|煞笔|智障|脑残)",
    r"shut.*up",
];

const TUPLES: &[&[&str]] = &[
    &["操", "你"],
    &["草", "你"],
    &["去", "死"],
    &["什么", "死"],
    &["妈", "死"],
    &["全家", "死"],
];

const EXTREME_KEYWORDS: &[&str] = &[
    "死妈", "cnm", "nmsl", "去死", "草你妈", "操你妈", "日你妈", "艹你妈", "你妈死", "你爸死",
    "你全家死", "fuck", "shit", "bitch", "什么死",
];

const EXTREME_PATTERNS: &[&str] =
    &[r"你.*妈.*死", r"你.*妈.*什么", r"[操草日艹].*你.*妈", r"你.*全家.*死", r"去.*死"];

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            keywords: owned(KEYWORDS),
            patterns: owned(PATTERNS),
            tuples: TUPLES.iter().map(|tuple| owned(tuple)).collect(),
            extreme_keywords: owned(EXTREME_KEYWORDS),
            extreme_patterns: owned(EXTREME_PATTERNS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FastPathClassifier {
    keywords: Vec<String>,
    patterns: Vec<Regex>,
    tuples: Vec<Vec<String>>,
    extreme_keywords: Vec<String>,
    extreme_patterns: Vec<Regex>,
}

impl FastPathClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        Self::from_rules(&ClassifierRules::default())
    }

    pub fn from_rules(rules: &ClassifierRules) -> Result<Self, regex::Error> {
        let normalize_all = |items: &[String]| -> Vec<String> {
            items.iter().map(|item| normalize(item)).filter(|item| !item.is_empty()).collect()
        };

        Ok(Self {
            keywords: normalize_all(&rules.keywords),
            patterns: compile(&rules.patterns)?,
            tuples: rules
                .tuples
                .iter()
                .map(|tuple| normalize_all(tuple))
                .filter(|tuple| !tuple.is_empty())
                .collect(),
            extreme_keywords: normalize_all(&rules.extreme_keywords),
            extreme_patterns: compile(&rules.extreme_patterns)?,
        })
    }

    pub fn classify(&self, text: &str) -> Classification {
        let normalized = normalize(text);
        if normalized.chars().count() < 2 {
            return Classification::CLEAN;
        }

        if self.is_extreme(&normalized) {
            return Classification::flagged(Severity::Extreme);
        }

        if self.is_abusive(&normalized) {
            return Classification::flagged(Severity::Normal);
        }

        Classification::CLEAN
    }

    fn is_abusive(&self, normalized: &str) -> bool {
        self.keywords.iter().any(|keyword| normalized.contains(keyword.as_str()))
            || self.patterns.iter().any(|pattern| pattern.is_match(normalized))
            || self
                .tuples
                .iter()
                .any(|tuple| tuple.iter().all(|word| normalized.contains(word.as_str())))
    }

    fn is_extreme(&self, normalized: &str) -> bool {
        self.extreme_keywords.iter().any(|keyword| normalized.contains(keyword.as_str()))
            || self.extreme_patterns.iter().any(|pattern| pattern.is_match(normalized))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|pattern| Regex::new(pattern)).collect()
}

/// Lowercases and drops every whitespace character.
pub fn normalize(text: &str) -> String {
    text.chars().filter(|ch| !ch.is_whitespace()).flat_map(char::to_lowercase).collect()
}

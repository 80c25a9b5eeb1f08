// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 检测方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// 页面文本词表匹配
    Text,
    /// DOM 结构选择器匹配
    Structural,
    /// URL 片段匹配
    Url,
    /// 标题、表单、iframe、窗口数等行为特征
    Behavioral,
    /// 页面源码中的验证服务 CDN 引用
    Network,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DetectionMethod::Text => write!(f, "text"),
            DetectionMethod::Structural => write!(f, "structural"),
            DetectionMethod::Url => write!(f, "url"),
            DetectionMethod::Behavioral => write!(f, "behavioral"),
            DetectionMethod::Network => write!(f, "network"),
        }
    }
}

/// 反爬挑战类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    #[default]
    Unknown,
    Recaptcha,
    Hcaptcha,
    Cloudflare,
    GenericCaptcha,
    UrlBasedChallenge,
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ChallengeType::Unknown => "unknown",
            ChallengeType::Recaptcha => "recaptcha",
            ChallengeType::Hcaptcha => "hcaptcha",
            ChallengeType::Cloudflare => "cloudflare",
            ChallengeType::GenericCaptcha => "generic_captcha",
            ChallengeType::UrlBasedChallenge => "url_based_challenge",
        };
        f.write_str(name)
    }
}

/// 单个检测方法产出的信号
///
/// 仅在融合步骤中即时消费，不做持久化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSignal {
    pub method: DetectionMethod,
    pub detected: bool,
    /// 置信度，范围 [0, 1]
    pub confidence: f64,
    pub indicators: Vec<String>,
    pub type_hint: ChallengeType,
}

impl DetectionSignal {
    /// 未命中的空信号
    pub fn clear(method: DetectionMethod) -> Self {
        Self {
            method,
            detected: false,
            confidence: 0.0,
            indicators: Vec::new(),
            type_hint: ChallengeType::Unknown,
        }
    }

    /// 根据累计权重构造信号，置信度截断到 1.0
    pub fn from_score(
        method: DetectionMethod,
        score: f64,
        indicators: Vec<String>,
        type_hint: ChallengeType,
    ) -> Self {
        Self {
            method,
            detected: !indicators.is_empty(),
            confidence: score.clamp(0.0, 1.0),
            indicators,
            type_hint,
        }
    }
}

/// 融合后的检测结论，每次抓取尝试产出一个
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub challenge_type: ChallengeType,
    pub confidence: f64,
    pub contributing_methods: Vec<DetectionMethod>,
    pub indicators: Vec<String>,
    pub suggested_strategy: Strategy,
}

/// 挑战绕过策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    #[serde(rename = "aggressive_bypass")]
    Aggressive,
    #[serde(rename = "cloudflare_bypass")]
    CloudflareBypass,
    #[serde(rename = "advanced_stealth")]
    AdvancedStealth,
    #[serde(rename = "standard_bypass")]
    Standard,
    #[serde(rename = "gentle_retry")]
    Gentle,
}

impl Strategy {
    /// 按置信度与挑战类型查表选择策略
    ///
    /// | 置信度 | 类型 | 策略 |
    /// |---|---|---|
    /// | >0.8 | 任意 | aggressive_bypass |
    /// | 0.5–0.8 | cloudflare | cloudflare_bypass |
    /// | 0.5–0.8 | recaptcha/hcaptcha | advanced_stealth |
    /// | 0.5–0.8 | 其他 | standard_bypass |
    /// | ≤0.5 | 任意 | gentle_retry |
    pub fn select(confidence: f64, challenge_type: ChallengeType) -> Self {
        if confidence > 0.8 {
            Strategy::Aggressive
        } else if confidence > 0.5 {
            match challenge_type {
                ChallengeType::Cloudflare => Strategy::CloudflareBypass,
                ChallengeType::Recaptcha | ChallengeType::Hcaptcha => Strategy::AdvancedStealth,
                _ => Strategy::Standard,
            }
        } else {
            Strategy::Gentle
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Aggressive => "aggressive_bypass",
            Strategy::CloudflareBypass => "cloudflare_bypass",
            Strategy::AdvancedStealth => "advanced_stealth",
            Strategy::Standard => "standard_bypass",
            Strategy::Gentle => "gentle_retry",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

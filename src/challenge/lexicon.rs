// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 挑战检测使用的固定词表、选择器与权重

use crate::domain::models::detection::ChallengeType;

/// 页面文本词表及权重，高特异性的词权重更高
pub const TEXT_INDICATORS: &[(&str, f64)] = &[
    ("captcha", 0.3),
    ("recaptcha", 0.3),
    ("hcaptcha", 0.3),
    ("verify you are human", 0.25),
    ("i'm not a robot", 0.25),
    ("cloudflare", 0.1),
    ("prove you're human", 0.1),
    ("security check", 0.1),
    ("suspicious activity", 0.1),
    ("unusual traffic", 0.1),
    ("please verify", 0.1),
    ("verify your identity", 0.1),
    ("bot detection", 0.1),
    ("are you a robot", 0.1),
    ("human verification", 0.1),
    ("challenge", 0.1),
    ("access denied", 0.1),
    ("blocked", 0.1),
    ("forbidden", 0.1),
    ("rate limit", 0.1),
];

/// 已知验证服务的 DOM 选择器
pub const STRUCTURAL_SELECTORS: &[&str] = &[
    "iframe[src*='recaptcha']",
    ".g-recaptcha",
    "#g-recaptcha",
    "[class*='recaptcha']",
    "iframe[src*='hcaptcha']",
    ".h-captcha",
    "#h-captcha",
    "[class*='hcaptcha']",
    "div[class*='captcha']",
    "div[id*='captcha']",
    "#captcha",
    ".captcha",
    ".cf-browser-verification",
    "#cf-wrapper",
    "[class*='cloudflare']",
    "[class*='challenge']",
    "[id*='challenge']",
    "[class*='verification']",
    "[id*='verification']",
    "[class*='bot-protection']",
    "[class*='anti-bot']",
    "[class*='security-check']",
];

pub const PROVIDER_SELECTOR_WEIGHT: f64 = 0.4;
pub const GENERIC_SELECTOR_WEIGHT: f64 = 0.2;

/// URL 片段及权重
pub const URL_FRAGMENTS: &[(&str, f64)] = &[
    ("captcha", 0.5),
    ("recaptcha", 0.5),
    ("hcaptcha", 0.2),
    ("cloudflare", 0.5),
    ("challenge", 0.2),
    ("verify", 0.2),
    ("security", 0.2),
    ("protection", 0.2),
];

/// 可疑标题用词
pub const TITLE_TERMS: &[&str] = &["captcha", "verify", "security", "challenge"];
/// 挑战表单内容用词
pub const FORM_TERMS: &[&str] = &["captcha", "verify", "challenge"];
/// 验证服务 iframe 的 src 片段
pub const IFRAME_TERMS: &[&str] = &["captcha", "recaptcha", "hcaptcha"];

pub const SUSPICIOUS_TITLE_WEIGHT: f64 = 0.3;
pub const MULTIPLE_WINDOWS_WEIGHT: f64 = 0.2;
pub const CHALLENGE_FORM_WEIGHT: f64 = 0.4;
pub const CAPTCHA_IFRAME_WEIGHT: f64 = 0.5;

/// 验证服务脚本/CDN 引用
pub const CDN_REFERENCES: &[(&str, &str, ChallengeType)] = &[
    ("www.google.com/recaptcha", "recaptcha", ChallengeType::Recaptcha),
    ("hcaptcha.com", "hcaptcha", ChallengeType::Hcaptcha),
    ("challenges.cloudflare.com", "cloudflare", ChallengeType::Cloudflare),
    ("/cdn-cgi/challenge-platform", "cloudflare", ChallengeType::Cloudflare),
    ("cloudflare.com", "cloudflare", ChallengeType::Cloudflare),
    ("funcaptcha.com", "funcaptcha", ChallengeType::GenericCaptcha),
];

pub const CDN_WEIGHT: f64 = 0.3;

/// 根据片段推断验证服务类型
pub fn provider_of(fragment: &str) -> Option<ChallengeType> {
    let fragment = fragment.to_lowercase();
    if fragment.contains("recaptcha") {
        Some(ChallengeType::Recaptcha)
    } else if fragment.contains("hcaptcha") || fragment.contains("h-captcha") {
        Some(ChallengeType::Hcaptcha)
    } else if fragment.contains("cloudflare") || fragment.contains("cf-") {
        Some(ChallengeType::Cloudflare)
    } else {
        None
    }
}

/// 多个服务类型同时出现时的优先级
pub fn provider_rank(kind: ChallengeType) -> u8 {
    match kind {
        ChallengeType::Recaptcha => 0,
        ChallengeType::Hcaptcha => 1,
        ChallengeType::Cloudflare => 2,
        ChallengeType::GenericCaptcha => 3,
        ChallengeType::UrlBasedChallenge => 4,
        ChallengeType::Unknown => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_inference() {
        assert_eq!(provider_of("iframe[src*='recaptcha']"), Some(ChallengeType::Recaptcha));
        assert_eq!(provider_of(".h-captcha"), Some(ChallengeType::Hcaptcha));
        assert_eq!(provider_of("#cf-wrapper"), Some(ChallengeType::Cloudflare));
        assert_eq!(provider_of("div[class*='captcha']"), None);
    }

    #[test]
    fn test_all_weights_are_positive() {
        assert!(TEXT_INDICATORS.iter().all(|(_, w)| *w > 0.0));
        assert!(URL_FRAGMENTS.iter().all(|(_, w)| *w > 0.0));
    }
}

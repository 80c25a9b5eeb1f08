// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use crate::challenge::lexicon::{
    self, CAPTCHA_IFRAME_WEIGHT, CDN_REFERENCES, CDN_WEIGHT, CHALLENGE_FORM_WEIGHT, FORM_TERMS,
    GENERIC_SELECTOR_WEIGHT, IFRAME_TERMS, MULTIPLE_WINDOWS_WEIGHT, PROVIDER_SELECTOR_WEIGHT,
    STRUCTURAL_SELECTORS, SUSPICIOUS_TITLE_WEIGHT, TEXT_INDICATORS, TITLE_TERMS, URL_FRAGMENTS,
};
use crate::domain::models::detection::{
    ChallengeType, DetectionMethod, DetectionResult, DetectionSignal, Strategy,
};
use crate::engines::traits::PageSnapshot;

struct StructuralPattern {
    css: &'static str,
    selector: Selector,
    weight: f64,
    provider: Option<ChallengeType>,
}

/// 反爬挑战检测器
///
/// 五种互相独立的检测方法分别产出 `DetectionSignal`，再由 `fuse`
/// 融合成一个结论。检测本身是纯函数，不访问网络也不使用随机数。
pub struct ChallengeDetector {
    threshold: f64,
    structural: Vec<StructuralPattern>,
    form: Option<Selector>,
    iframe: Option<Selector>,
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self::new(0.3)
    }
}

impl ChallengeDetector {
    /// 创建检测器，融合置信度严格大于 `threshold` 时判定为挑战
    pub fn new(threshold: f64) -> Self {
        let structural = STRUCTURAL_SELECTORS
            .iter()
            .copied()
            .filter_map(|css| match Selector::parse(css) {
                Ok(selector) => {
                    let provider = lexicon::provider_of(css);
                    Some(StructuralPattern {
                        css,
                        selector,
                        weight: if provider.is_some() {
                            PROVIDER_SELECTOR_WEIGHT
                        } else {
                            GENERIC_SELECTOR_WEIGHT
                        },
                        provider,
                    })
                }
                Err(e) => {
                    warn!(selector = %css, "检测选择器无效: {}", e);
                    None
                }
            })
            .collect();

        Self {
            threshold,
            structural,
            form: Selector::parse("form").ok(),
            iframe: Selector::parse("iframe").ok(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// 对页面运行全部检测方法并融合
    pub fn detect(&self, page: &PageSnapshot) -> DetectionResult {
        self.fuse(&self.signals(page))
    }

    /// 运行全部检测方法
    pub fn signals(&self, page: &PageSnapshot) -> Vec<DetectionSignal> {
        let document = Html::parse_document(&page.html);
        vec![
            self.scan_text(page),
            self.scan_structure_in(&document),
            self.scan_url(&page.url),
            self.scan_behavior_in(page, &document),
            self.scan_network(&page.html),
        ]
    }

    /// 文本扫描：标题、可见文本与页面源码匹配词表，每个命中词累加一次权重
    ///
    /// 源码里的词（脚本、隐藏字段）与可见文本同等计分。
    pub fn scan_text(&self, page: &PageSnapshot) -> DetectionSignal {
        let haystack = format!("{} {} {}", page.title, page.text, page.html).to_lowercase();
        let mut score: f64 = 0.0;
        let mut indicators = Vec::new();
        for (term, weight) in TEXT_INDICATORS {
            if haystack.contains(term) {
                score += *weight;
                indicators.push(format!("text:{}", term));
            }
        }

        let type_hint = if haystack.contains("recaptcha") {
            ChallengeType::Recaptcha
        } else if haystack.contains("hcaptcha") {
            ChallengeType::Hcaptcha
        } else if haystack.contains("cloudflare") {
            ChallengeType::Cloudflare
        } else if haystack.contains("captcha") {
            ChallengeType::GenericCaptcha
        } else {
            ChallengeType::Unknown
        };

        DetectionSignal::from_score(DetectionMethod::Text, score, indicators, type_hint)
    }

    /// 结构扫描：只统计可见元素
    pub fn scan_structure(&self, html: &str) -> DetectionSignal {
        self.scan_structure_in(&Html::parse_document(html))
    }

    fn scan_structure_in(&self, document: &Html) -> DetectionSignal {
        let mut score: f64 = 0.0;
        let mut indicators = Vec::new();
        let mut best: Option<ChallengeType> = None;

        for pattern in &self.structural {
            if document.select(&pattern.selector).any(is_visible) {
                score += pattern.weight;
                indicators.push(format!("selector:{}", pattern.css));
                let found = pattern.provider.unwrap_or(ChallengeType::GenericCaptcha);
                best = Some(match best {
                    Some(current) if lexicon::provider_rank(current) <= lexicon::provider_rank(found) => current,
                    _ => found,
                });
            }
        }

        DetectionSignal::from_score(
            DetectionMethod::Structural,
            score,
            indicators,
            best.unwrap_or(ChallengeType::Unknown),
        )
    }

    /// URL 扫描
    pub fn scan_url(&self, url: &str) -> DetectionSignal {
        let url = url.to_lowercase();
        let mut score: f64 = 0.0;
        let mut indicators = Vec::new();
        for (fragment, weight) in URL_FRAGMENTS {
            if url.contains(fragment) {
                score += *weight;
                indicators.push(format!("url:{}", fragment));
            }
        }

        let type_hint = if indicators.is_empty() {
            ChallengeType::Unknown
        } else if url.contains("recaptcha") {
            ChallengeType::Recaptcha
        } else if url.contains("hcaptcha") {
            ChallengeType::Hcaptcha
        } else if url.contains("cloudflare") {
            ChallengeType::Cloudflare
        } else {
            ChallengeType::UrlBasedChallenge
        };

        DetectionSignal::from_score(DetectionMethod::Url, score, indicators, type_hint)
    }

    /// 行为扫描：可疑标题、多窗口、挑战表单、验证服务 iframe
    pub fn scan_behavior(&self, page: &PageSnapshot) -> DetectionSignal {
        self.scan_behavior_in(page, &Html::parse_document(&page.html))
    }

    fn scan_behavior_in(&self, page: &PageSnapshot, document: &Html) -> DetectionSignal {
        let mut score: f64 = 0.0;
        let mut indicators = Vec::new();
        let mut type_hint = ChallengeType::Unknown;

        let title = page.title.to_lowercase();
        if TITLE_TERMS.iter().any(|t| title.contains(t)) {
            score += SUSPICIOUS_TITLE_WEIGHT;
            indicators.push("suspicious_title".to_string());
        }

        if page.window_count > 1 {
            score += MULTIPLE_WINDOWS_WEIGHT;
            indicators.push("multiple_windows".to_string());
        }

        if let Some(form) = &self.form {
            let challenge_form = document.select(form).any(|el| {
                let inner = el.inner_html().to_lowercase();
                FORM_TERMS.iter().any(|t| inner.contains(t))
            });
            if challenge_form {
                score += CHALLENGE_FORM_WEIGHT;
                indicators.push("challenge_form".to_string());
            }
        }

        if let Some(iframe) = &self.iframe {
            for el in document.select(iframe) {
                let src = el.value().attr("src").unwrap_or_default().to_lowercase();
                if IFRAME_TERMS.iter().any(|t| src.contains(t)) {
                    score += CAPTCHA_IFRAME_WEIGHT;
                    indicators.push(format!("captcha_iframe:{}", src));
                    if type_hint == ChallengeType::Unknown {
                        type_hint = lexicon::provider_of(&src).unwrap_or(ChallengeType::GenericCaptcha);
                    }
                }
            }
        }

        DetectionSignal::from_score(DetectionMethod::Behavioral, score, indicators, type_hint)
    }

    /// 网络扫描：页面源码中的验证服务 CDN 引用
    pub fn scan_network(&self, html: &str) -> DetectionSignal {
        let source = html.to_lowercase();
        let mut score: f64 = 0.0;
        let mut indicators: Vec<String> = Vec::new();
        let mut type_hint = ChallengeType::Unknown;

        for (reference, service, kind) in CDN_REFERENCES {
            if source.contains(reference) {
                let indicator = format!("cdn_{}", service);
                if !indicators.contains(&indicator) {
                    score += CDN_WEIGHT;
                    indicators.push(indicator);
                }
                if type_hint == ChallengeType::Unknown {
                    type_hint = *kind;
                }
            }
        }

        DetectionSignal::from_score(DetectionMethod::Network, score, indicators, type_hint)
    }

    /// 融合多个信号
    ///
    /// 置信度为命中方法置信度之和并截断到 1.0；挑战类型取命中方法中出现
    /// 次数最多的非 unknown 类型，次数相同时取最先出现者。
    pub fn fuse(&self, signals: &[DetectionSignal]) -> DetectionResult {
        fuse_signals(signals, self.threshold)
    }

    /// 页面上是否仍有 Cloudflare 等待页标记
    pub fn clearance_pending(&self, page: &PageSnapshot) -> bool {
        if page.title.to_lowercase().contains("just a moment") {
            return true;
        }
        let document = Html::parse_document(&page.html);
        self.structural
            .iter()
            .filter(|p| p.provider == Some(ChallengeType::Cloudflare))
            .any(|p| document.select(&p.selector).any(is_visible))
    }
}

/// 按固定阈值融合信号
pub fn fuse_signals(signals: &[DetectionSignal], threshold: f64) -> DetectionResult {
    let fired: Vec<&DetectionSignal> = signals.iter().filter(|s| s.detected).collect();

    let confidence = fired
        .iter()
        .map(|s| s.confidence.clamp(0.0, 1.0))
        .sum::<f64>()
        .min(1.0);

    let mut counts: Vec<(ChallengeType, usize)> = Vec::new();
    for signal in &fired {
        if signal.type_hint == ChallengeType::Unknown {
            continue;
        }
        match counts.iter_mut().find(|(kind, _)| *kind == signal.type_hint) {
            Some((_, n)) => *n += 1,
            None => counts.push((signal.type_hint, 1)),
        }
    }
    let mut challenge_type = ChallengeType::Unknown;
    let mut best = 0;
    for (kind, n) in counts {
        if n > best {
            best = n;
            challenge_type = kind;
        }
    }

    DetectionResult {
        detected: confidence > threshold,
        challenge_type,
        confidence,
        contributing_methods: fired.iter().map(|s| s.method).collect(),
        indicators: fired
            .iter()
            .flat_map(|s| s.indicators.iter().cloned())
            .collect(),
        suggested_strategy: Strategy::select(confidence, challenge_type),
    }
}

/// 元素及其祖先均未被隐藏
fn is_visible(element: ElementRef<'_>) -> bool {
    if hides(element) {
        return false;
    }
    !element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(hides)
}

fn hides(element: ElementRef<'_>) -> bool {
    let el = element.value();
    if el.attr("hidden").is_some() {
        return true;
    }
    if el.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
        return true;
    }
    if el.attr("width").is_some_and(is_zero) || el.attr("height").is_some_and(is_zero) {
        return true;
    }
    el.attr("style").is_some_and(style_hides)
}

fn style_hides(style: &str) -> bool {
    style.split(';').any(|decl| {
        let Some((prop, value)) = decl.split_once(':') else {
            return false;
        };
        let prop = prop.trim().to_lowercase();
        let value = value.trim().to_lowercase();
        match prop.as_str() {
            "display" => value == "none",
            "visibility" => value == "hidden",
            "width" | "height" => is_zero(&value),
            _ => false,
        }
    })
}

fn is_zero(value: &str) -> bool {
    let v = value.trim().trim_end_matches("px").trim();
    v == "0" || v == "0.0"
}

#[cfg(test)]
#[path = "detector_test.rs"]
mod tests;

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::{HashMap, HashSet};

use crate::config::settings::{PrioritySettings, SourceProfile};

/// 任务优先级计算器
///
/// `priority = base + 来源加分 - page_penalty × (page - 1) - 热门关键词扣分`，下限为 1。
#[derive(Debug, Clone)]
pub struct PriorityCalculator {
    settings: PrioritySettings,
    bonuses: HashMap<String, i32>,
    contended: HashSet<String>,
}

impl PriorityCalculator {
    pub fn new(settings: PrioritySettings, sources: &HashMap<String, SourceProfile>) -> Self {
        let bonuses = sources
            .iter()
            .map(|(name, profile)| (name.clone(), profile.reliability_bonus))
            .collect();
        let contended = settings
            .high_contention_keywords
            .iter()
            .map(|k| normalize(k))
            .collect();
        Self {
            settings,
            bonuses,
            contended,
        }
    }

    pub fn source_bonus(&self, source: &str) -> i32 {
        self.bonuses
            .get(source)
            .copied()
            .unwrap_or(self.settings.unknown_source_bonus)
    }

    pub fn is_high_contention(&self, keyword: &str) -> bool {
        self.contended.contains(&normalize(keyword))
    }

    pub fn priority(&self, source: &str, keyword: &str, page: u32) -> i32 {
        let page_penalty = i64::from(self.settings.page_penalty).saturating_mul(i64::from(page.max(1)) - 1);
        let keyword_penalty = if self.is_high_contention(keyword) {
            self.settings.common_keyword_penalty
        } else {
            0
        };
        let raw = (i64::from(self.settings.base) + i64::from(self.source_bonus(source)))
            .saturating_sub(page_penalty)
            .saturating_sub(i64::from(keyword_penalty));
        raw.clamp(1, i64::from(i32::MAX)) as i32
    }
}

fn normalize(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::Settings;

    fn calculator() -> PriorityCalculator {
        let settings = Settings::default();
        PriorityCalculator::new(settings.priority, &settings.sources)
    }

    #[test]
    fn test_priority_formula() {
        let calc = calculator();
        // 100 + 20 (ebay) - 0 - 15 (laptop)
        assert_eq!(calc.priority("ebay", "laptop", 1), 105);
        // 100 + 10 (walmart) - 10
        assert_eq!(calc.priority("walmart", "headphones", 2), 100);
        // 100 + 0 (amazon) - 20 - 15
        assert_eq!(calc.priority("amazon", "Tablet", 3), 65);
        // unknown source gets the default bonus
        assert_eq!(calc.priority("bestbuy", "camera", 1), 105);
    }

    #[test]
    fn test_priority_is_floored_at_one() {
        let calc = calculator();
        assert_eq!(calc.priority("amazon", "phone", 50), 1);
    }

    #[test]
    fn test_huge_page_numbers_floor_at_one() {
        let calc = calculator();
        assert_eq!(calc.priority("amazon", "phone", u32::MAX), 1);
        assert_eq!(calc.priority("unknown", "laptop", u32::MAX - 1), 1);
    }

    #[test]
    fn test_later_pages_never_outrank_earlier_ones() {
        let calc = calculator();
        for page in 1..10 {
            assert!(calc.priority("ebay", "mouse", page) >= calc.priority("ebay", "mouse", page + 1));
        }
    }
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 轮换使用的桌面 Chrome User-Agent
pub const DESKTOP_USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
];

/// 随机选取一个 User-Agent，尽量避开当前正在使用的
pub fn random_user_agent(current: Option<&str>) -> &'static str {
    let candidates: Vec<&'static str> = DESKTOP_USER_AGENTS
        .iter()
        .copied()
        .filter(|ua| Some(*ua) != current)
        .collect();
    let pool = if candidates.is_empty() {
        DESKTOP_USER_AGENTS.to_vec()
    } else {
        candidates
    };
    pool[rand::random_range(0..pool.len())]
}

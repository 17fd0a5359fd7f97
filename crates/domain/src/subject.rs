//! 点分主题工具
//!
//! 主题采用点分命名（例如 `chat.message.send`），订阅模式支持
//! `*`（匹配单个分段）和尾部 `>`（匹配剩余全部分段）两种通配符。

/// 主题分段分隔符
pub const TOKEN_SEPARATOR: char = '.';

/// 单段通配符
pub const WILDCARD_TOKEN: &str = "*";

/// 尾部多段通配符
pub const WILDCARD_TAIL: &str = ">";

/// 取主题的第 `index` 个分段，空分段视为缺失
pub fn token(subject: &str, index: usize) -> Option<&str> {
    subject
        .split(TOKEN_SEPARATOR)
        .nth(index)
        .filter(|t| !t.is_empty())
}

/// 判断主题是否匹配订阅模式
///
/// `*` 恰好匹配一个分段，`>` 必须位于模式末尾并匹配至少一个
/// 剩余分段，其余分段逐字比较。
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split(TOKEN_SEPARATOR);
    let mut subject_tokens = subject.split(TOKEN_SEPARATOR).peekable();

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (None, None) => return true,
            // `>` 只在模式末尾有效，出现在中间的模式不匹配任何主题
            (Some(WILDCARD_TAIL), Some(_)) => return pattern_tokens.next().is_none(),
            (Some(WILDCARD_TOKEN), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            _ => return false,
        }
    }
}

/// 将订阅模式转换为 Redis PSUBSCRIBE 使用的 glob 模式
///
/// glob 的 `*` 可以跨越点号，因此转换后的模式可能过度匹配，
/// 投递前必须再用 [`matches`] 精确过滤。
pub fn to_redis_glob(pattern: &str) -> String {
    pattern
        .split(TOKEN_SEPARATOR)
        .map(|t| match t {
            WILDCARD_TOKEN | WILDCARD_TAIL => "*".to_string(),
            literal => escape_glob(literal),
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// 转义 glob 元字符，保证字面分段逐字匹配
fn escape_glob(token: &str) -> String {
    let mut escaped = String::with_capacity(token.len());
    for c in token.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

//! 文本匹配器
//!
//! 批改的第一道关卡：对答案做确定性的归一化比较。
//! 纯函数，无任何外部依赖。

use serde::Deserialize;

/// 标准答案中分隔多个可接受说法的分隔符
const VARIANT_SEPARATORS: [char; 4] = ['/', '\\', '|', ','];

/// 归一化答案文本
///
/// trim → 小写 → 去掉所有空白 → 去掉 `()[]{}`。
/// 确定性、幂等：`normalize(normalize(s)) == normalize(s)`。
pub fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '(' | ')' | '[' | ']' | '{' | '}'))
        .collect()
}

/// 判断学生答案与标准答案是否等价
///
/// 标准答案可以用 `/ \ | ,` 列出多个可接受说法，
/// 学生答案归一化后等于任意一个非空说法即算正确。
pub fn is_equivalent(student_answer: &str, correct_answer: &str) -> bool {
    let student = normalize(student_answer);
    correct_answer
        .split(VARIANT_SEPARATORS)
        .map(normalize)
        .any(|variant| !variant.is_empty() && variant == student)
}

/// 文字系统种类
///
/// 用于语义兜底的路由启发式：标准答案里出现这些文字，
/// 说明是自由表述题，字面匹配不可靠。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    /// 韩文
    Hangul,
    /// 汉字
    Han,
    /// 平假名
    Hiragana,
    /// 片假名
    Katakana,
}

impl ScriptKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "hangul" => Some(ScriptKind::Hangul),
            "han" => Some(ScriptKind::Han),
            "hiragana" => Some(ScriptKind::Hiragana),
            "katakana" => Some(ScriptKind::Katakana),
            _ => None,
        }
    }

    fn contains(self, c: char) -> bool {
        match self {
            ScriptKind::Hangul => {
                matches!(c, '\u{AC00}'..='\u{D7A3}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
            }
            ScriptKind::Han => matches!(c, '\u{4E00}'..='\u{9FFF}'),
            ScriptKind::Hiragana => matches!(c, '\u{3040}'..='\u{309F}'),
            ScriptKind::Katakana => matches!(c, '\u{30A0}'..='\u{30FF}'),
        }
    }
}

/// 判断标准答案是否需要语义校验兜底
///
/// 注意这只是启发式：按文字系统判断"自由表述"并不严格，
/// 所以脚本集合由配置决定，而不是写死。
pub fn needs_semantic_review(correct_answer: &str, scripts: &[ScriptKind]) -> bool {
    correct_answer
        .chars()
        .any(|c| scripts.iter().any(|s| s.contains(c)))
}

//! 匹配模式编译与评分
//!
//! 把用户提供的目标地址 (单个地址或地址文件) 编译为定宽的 (mask, value) 字节对，
//! 并提供前缀/后缀连续匹配计数。

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, info};

use crate::config::{
    ADDRESS_MARKER, ADDRESS_PREFIX_BYTE, ENCODED_ADDRESS_LEN, MatchCriteria, MatchWindow,
    PATTERN_WIDTH, RAW_ADDRESS_LEN, TRIM_LEN, TRIM_OFFSET,
};
use crate::error::{Result, SearchError};

/// 单个匹配模式
///
/// 位置 i 上的候选字节 c 匹配当且仅当 `(c & mask[i]) == value[i]`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPattern {
    mask: Vec<u8>,
    value: Vec<u8>,
}

impl MatchPattern {
    /// 每个位置都要求精确匹配
    pub fn exact(bytes: &[u8]) -> Self {
        Self {
            mask: vec![0xFF; bytes.len()],
            value: bytes.to_vec(),
        }
    }

    /// 由掩码和期望值构造，期望值中掩码以外的位会被清零
    pub fn from_parts(mask: Vec<u8>, value: Vec<u8>) -> anyhow::Result<Self> {
        if mask.len() != value.len() {
            anyhow::bail!(
                "mask and value width differ: {} vs {}",
                mask.len(),
                value.len()
            );
        }
        let value = value.iter().zip(&mask).map(|(v, m)| v & m).collect();
        Ok(Self { mask, value })
    }

    pub fn width(&self) -> usize {
        self.mask.len()
    }

    pub fn mask(&self) -> &[u8] {
        &self.mask
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    #[inline]
    fn matches_at(&self, i: usize, c: u8) -> bool {
        (c & self.mask[i]) == self.value[i]
    }

    /// 从位置 0 开始连续匹配的字节数
    pub fn prefix_run(&self, window: &[u8]) -> usize {
        window
            .iter()
            .enumerate()
            .take(self.width())
            .take_while(|&(i, &c)| self.matches_at(i, c))
            .count()
    }

    /// 从末尾开始连续匹配的字节数 (模式与窗口按末尾对齐)
    pub fn suffix_run(&self, window: &[u8]) -> usize {
        let width = self.width();
        window
            .iter()
            .rev()
            .take(width)
            .enumerate()
            .take_while(|&(k, &c)| self.matches_at(width - 1 - k, c))
            .count()
    }

    pub fn score(&self, window: &[u8]) -> Score {
        Score {
            prefix: self.prefix_run(window),
            suffix: self.suffix_run(window),
        }
    }
}

/// 候选地址相对某个模式的得分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Score {
    pub prefix: usize,
    pub suffix: usize,
}

impl Score {
    /// 按匹配要求截断后的得分
    pub fn capped(&self, criteria: &MatchCriteria) -> Score {
        Score {
            prefix: self.prefix.min(criteria.prefix_count),
            suffix: self.suffix.min(criteria.suffix_count),
        }
    }

    pub fn satisfies(&self, criteria: &MatchCriteria) -> bool {
        self.prefix >= criteria.prefix_count && self.suffix >= criteria.suffix_count
    }

    pub fn total(&self) -> usize {
        self.prefix + self.suffix
    }
}

/// 目标分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// 完整 34 字符地址，需去掉中间段
    Full,
    /// 已裁剪好的 20 字符 (前 10 + 后 10)
    Partial,
}

/// 按长度和首字符对一行目标分类，无法识别时返回 None
pub fn classify(target: &[u8]) -> Option<TargetKind> {
    if !target.is_ascii() {
        return None;
    }
    match target.len() {
        ENCODED_ADDRESS_LEN if target[0] == ADDRESS_MARKER as u8 => Some(TargetKind::Full),
        PATTERN_WIDTH => Some(TargetKind::Partial),
        _ => None,
    }
}

/// 编译单行目标，未识别的行返回 None
pub fn compile_target(target: &[u8]) -> Option<MatchPattern> {
    let target = target.trim_ascii();
    match classify(target)? {
        TargetKind::Full => {
            let mut kept = Vec::with_capacity(PATTERN_WIDTH);
            kept.extend_from_slice(&target[..TRIM_OFFSET]);
            kept.extend_from_slice(&target[TRIM_OFFSET + TRIM_LEN..]);
            Some(MatchPattern::exact(&kept))
        }
        TargetKind::Partial => Some(MatchPattern::exact(target)),
    }
}

/// 一次运行的全部模式，创建后只读
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<MatchPattern>,
    window: MatchWindow,
}

impl PatternSet {
    /// 编译匹配输入
    ///
    /// 完整地址直接编译；否则若是已存在的文件则逐行读取；否则当作单行目标。
    pub fn compile(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if classify(trimmed.as_bytes()) == Some(TargetKind::Full) {
            return Self::from_targets([trimmed.as_bytes()], input);
        }

        let path = Path::new(input);
        if path.is_file() {
            return Self::from_file(path);
        }

        Self::from_targets([trimmed.as_bytes()], input)
    }

    /// 从换行分隔的地址文件编译，格式不对的行会被跳过
    pub fn from_file(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut patterns = Vec::new();

        for (line_no, line) in reader.split(b'\n').enumerate() {
            let line = line?;
            match compile_target(&line) {
                Some(pattern) => patterns.push(pattern),
                None => debug!(
                    "skip line {} of {}: unrecognized target",
                    line_no + 1,
                    path.display()
                ),
            }
        }

        Self::new(patterns, MatchWindow::Encoded, &path.display().to_string())
    }

    fn from_targets<'a>(
        targets: impl IntoIterator<Item = &'a [u8]>,
        source: &str,
    ) -> Result<Self> {
        let patterns = targets.into_iter().filter_map(compile_target).collect();
        Self::new(patterns, MatchWindow::Encoded, source)
    }

    /// 构造模式集，空集合或宽度不一致都视为配置错误
    pub fn new(
        patterns: Vec<MatchPattern>,
        window: MatchWindow,
        source: &str,
    ) -> Result<Self> {
        if patterns.is_empty() {
            return Err(SearchError::EmptyPatternSet(source.to_string()));
        }
        let width = window.width();
        if let Some(bad) = patterns.iter().find(|p| p.width() != width) {
            return Err(SearchError::InvalidSizing(format!(
                "pattern width {} does not match window width {}",
                bad.width(),
                width
            )));
        }
        info!("Compiled {} matching pattern(s) from {}", patterns.len(), source);
        Ok(Self { patterns, window })
    }

    /// 生成模式: 只要求原始地址首字节为网络前缀，任何合法地址都能命中
    pub fn generate() -> Self {
        let mut mask = vec![0u8; RAW_ADDRESS_LEN];
        let mut value = vec![0u8; RAW_ADDRESS_LEN];
        mask[0] = 0xFF;
        value[0] = ADDRESS_PREFIX_BYTE;

        Self {
            patterns: vec![MatchPattern { mask, value }],
            window: MatchWindow::Raw,
        }
    }

    /// 模式数量 (matchingCount)
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn width(&self) -> usize {
        self.window.width()
    }

    pub fn window(&self) -> MatchWindow {
        self.window
    }

    pub fn patterns(&self) -> &[MatchPattern] {
        &self.patterns
    }

    /// 返回第一个接受该窗口的模式下标及其得分 (按匹配要求截断)
    pub fn evaluate(&self, window: &[u8], criteria: &MatchCriteria) -> Option<(usize, Score)> {
        self.patterns.iter().enumerate().find_map(|(idx, pattern)| {
            let score = pattern.score(window);
            score
                .satisfies(criteria)
                .then(|| (idx, score.capped(criteria)))
        })
    }

    /// 平铺为内核使用的 mask / value 缓冲区
    pub fn flatten(&self) -> (Vec<u8>, Vec<u8>) {
        let mut mask = Vec::with_capacity(self.len() * self.width());
        let mut value = Vec::with_capacity(self.len() * self.width());
        for pattern in &self.patterns {
            mask.extend_from_slice(pattern.mask());
            value.extend_from_slice(pattern.value());
        }
        (mask, value)
    }
}

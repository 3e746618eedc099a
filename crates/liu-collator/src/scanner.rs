//! 起始码扫描.
//!
//! 起始码由 3 字节前缀 `00 00 01` 加 1 字节标识组成.
//! 本模块只包含纯函数和显式的输入游标, 状态全部由收集器持有.

/// 起始码前缀
pub const START_CODE_PREFIX: [u8; 3] = [0x00, 0x00, 0x01];

/// 完整起始码长度 (前缀 + 标识)
pub const START_CODE_SIZE: usize = 4;

/// 输入游标
///
/// 记录一次输入调用中尚未消费的数据.
#[derive(Debug, Clone, Copy)]
pub struct ScanCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ScanCursor<'a> {
    /// 创建游标
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// 剩余数据
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// 剩余字节数
    pub fn len(&self) -> usize {
        self.data.len() - self.pos
    }

    /// 是否已消费完毕
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// 已消费的字节数
    pub fn position(&self) -> usize {
        self.pos
    }

    /// 取出至多 `n` 字节并前移
    pub fn take(&mut self, n: usize) -> &'a [u8] {
        let n = n.min(self.len());
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        out
    }

    /// 跳过至多 `n` 字节, 返回实际跳过的字节数
    pub fn advance(&mut self, n: usize) -> usize {
        let n = n.min(self.len());
        self.pos += n;
        n
    }
}

/// 忽略的起始码标识区间 (闭区间)
///
/// 区间内的标识不会触发头部解析, 按普通负载处理 (例如 MPEG-2 的 slice).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IgnoreRange {
    /// 起始标识
    pub start: u8,
    /// 结束标识
    pub end: u8,
}

impl IgnoreRange {
    /// 创建忽略区间
    pub const fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    /// 标识是否落在区间内
    pub const fn contains(&self, code: u8) -> bool {
        code >= self.start && code <= self.end
    }
}

/// 判断标识是否被忽略
pub fn is_ignored(ignore: Option<IgnoreRange>, code: u8) -> bool {
    ignore.is_some_and(|r| r.contains(code))
}

/// 在数据中查找下一个完整的起始码
///
/// 返回前缀第一个字节的偏移, 标识字节必须也在 `data` 内.
/// 标识落在忽略区间内的起始码被跳过.
pub fn find_next_start_code(data: &[u8], ignore: Option<IgnoreRange>) -> Option<usize> {
    if data.len() < START_CODE_SIZE {
        return None;
    }

    // i 指向候选前缀的最后一个字节 (01)
    let mut i = 2;
    while i + 1 < data.len() {
        match data[i] {
            0x01 if data[i - 1] == 0 && data[i - 2] == 0 => {
                if !is_ignored(ignore, data[i + 1]) {
                    return Some(i - 2);
                }
                i += 3;
            }
            0x00 => i += 1,
            _ => i += 3,
        }
    }
    None
}

/// 检测跨越已累积数据与新数据的起始码
///
/// `tail` 为已累积数据的末尾 (至多 3 字节), `data` 为新数据.
/// 返回起始码落在 `data` 中的字节数 (1..=3), 0 表示没有跨越的起始码.
/// 返回值大于 `data.len()` 时表示 "可能存在", 需要等待更多数据才能确认.
pub fn spanning_count(tail: &[u8], data: &[u8]) -> usize {
    if data.is_empty() {
        return 0;
    }

    for in_data in 1..START_CODE_SIZE {
        // 前缀中有 `in_data - 1` 字节在新数据里
        let in_tail = START_CODE_SIZE - in_data;
        if tail.len() < in_tail {
            continue;
        }
        let tail_part = &tail[tail.len() - in_tail..];
        if tail_part != &START_CODE_PREFIX[..in_tail] {
            continue;
        }

        let expected = &START_CODE_PREFIX[in_tail..];
        let available = expected.len().min(data.len());
        if data[..available] == expected[..available] {
            return in_data;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_next_start_code() {
        let data = [0xAA, 0x00, 0x00, 0x01, 0x0D, 0x55];
        assert_eq!(find_next_start_code(&data, None), Some(1));

        let leading = [0x00, 0x00, 0x01, 0x0F];
        assert_eq!(find_next_start_code(&leading, None), Some(0));

        // 标识不在数据中, 不算完整起始码
        let truncated = [0x12, 0x00, 0x00, 0x01];
        assert_eq!(find_next_start_code(&truncated, None), None);

        // 多余的前导零
        let zeros = [0x00, 0x00, 0x00, 0x00, 0x01, 0xE0];
        assert_eq!(find_next_start_code(&zeros, None), Some(2));
    }

    #[test]
    fn test_find_next_start_code_ignore_range() {
        let data = [0x00, 0x00, 0x01, 0x05, 0x77, 0x00, 0x00, 0x01, 0xB3];
        let ignore = Some(IgnoreRange::new(0x01, 0xAF));
        assert_eq!(find_next_start_code(&data, ignore), Some(5), "应跳过 slice 起始码");
        assert_eq!(find_next_start_code(&data, None), Some(0));
    }

    #[test]
    fn test_spanning_count() {
        // ...00 00 01 | 0D
        assert_eq!(spanning_count(&[0x00, 0x00, 0x01], &[0x0D, 0x11]), 1);
        // ...00 00 | 01 0D
        assert_eq!(spanning_count(&[0x12, 0x00, 0x00], &[0x01, 0x0D]), 2);
        // ...00 | 00 01 0D
        assert_eq!(spanning_count(&[0x12, 0x34, 0x00], &[0x00, 0x01, 0x0D]), 3);
        // 无跨越
        assert_eq!(spanning_count(&[0x12, 0x34, 0x00], &[0x01, 0x0D]), 0);
        assert_eq!(spanning_count(&[], &[0x00, 0x00, 0x01, 0x0D]), 0);
    }

    #[test]
    fn test_spanning_count_needs_more_data() {
        // ...00 | 00 -> 可能是起始码, 需要 3 字节才能确认
        assert_eq!(spanning_count(&[0x55, 0x00], &[0x00]), 3);
        // ...00 00 | 01 -> 需要再读 1 字节标识
        assert_eq!(spanning_count(&[0x00, 0x00], &[0x01]), 2);
    }

    #[test]
    fn test_scan_cursor() {
        let data = [1u8, 2, 3, 4, 5];
        let mut cursor = ScanCursor::new(&data);
        assert_eq!(cursor.take(2), &[1, 2]);
        assert_eq!(cursor.advance(10), 3);
        assert!(cursor.is_empty());
        assert_eq!(cursor.position(), 5);
        assert!(cursor.take(1).is_empty());
    }
}

//! 有理数类型, 用于帧率、像素宽高比和 B 帧分数.

use std::fmt;

/// 有理数, 由分子和分母组成
///
/// 例如: 帧率 30000/1001 表示 29.97fps, 宽高比 12/11 表示 PAL 4:3 像素.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// 分子
    pub num: i32,
    /// 分母
    pub den: i32,
}

impl Rational {
    /// 创建新的有理数
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 零值
    pub const ZERO: Self = Self { num: 0, den: 1 };

    /// 1:1
    pub const ONE: Self = Self { num: 1, den: 1 };

    /// 未定义 (分母为 0)
    pub const UNDEFINED: Self = Self { num: 0, den: 0 };

    /// 23.976 fps, 序列头未给出帧率时的默认值
    pub const FRAME_RATE_23_976: Self = Self {
        num: 24000,
        den: 1001,
    };

    /// 判断是否有效 (分母不为 0)
    pub const fn is_valid(&self) -> bool {
        self.den != 0
    }

    /// 判断是否为有效的正值 (可用作帧率)
    pub const fn is_positive(&self) -> bool {
        self.den != 0 && self.num != 0 && ((self.num > 0) == (self.den > 0))
    }

    /// 对有理数进行约分
    pub fn reduce(self) -> Self {
        if self.den == 0 {
            return self;
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        if g == 0 {
            return self;
        }
        let g = g as i32;
        // 保证分母为正
        let sign = if self.den < 0 { -1 } else { 1 };
        Self {
            num: sign * self.num / g,
            den: sign * self.den / g,
        }
    }

    /// 按数值比较 (2/4 与 1/2 相等)
    pub fn same_value(&self, other: &Self) -> bool {
        i64::from(self.num) * i64::from(other.den) == i64::from(other.num) * i64::from(self.den)
    }

    /// 乘以整数并约分
    pub fn mul_int(self, k: i32) -> Self {
        Self {
            num: self.num.saturating_mul(k),
            den: self.den,
        }
        .reduce()
    }
}

impl std::ops::Mul for Rational {
    type Output = Self;

    /// 两个有理数相乘
    fn mul(self, other: Self) -> Self {
        Self {
            num: self.num * other.num,
            den: self.den * other.den,
        }
        .reduce()
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self { num, den }
    }
}

impl From<i32> for Rational {
    fn from(num: i32) -> Self {
        Self { num, den: 1 }
    }
}

/// 求最大公约数 (欧几里得算法)
fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_reduce() {
        assert_eq!(Rational::new(30, 60).reduce(), Rational::new(1, 2));
        assert_eq!(Rational::new(3, -6).reduce(), Rational::new(-1, 2));
    }

    #[test]
    fn test_rational_same_value() {
        assert!(Rational::new(2, 4).same_value(&Rational::new(1, 2)));
        assert!(!Rational::FRAME_RATE_23_976.same_value(&Rational::new(24, 1)));
    }

    #[test]
    fn test_rational_field_rate() {
        let field_rate = Rational::new(30000, 1001).mul_int(2);
        assert_eq!(field_rate, Rational::new(60000, 1001));
        assert!(field_rate.is_positive());
        assert!(!Rational::UNDEFINED.is_positive());
        assert!(!Rational::ZERO.is_positive());
    }

    #[test]
    fn test_rational_display() {
        assert_eq!(Rational::FRAME_RATE_23_976.to_string(), "24000/1001");
    }
}

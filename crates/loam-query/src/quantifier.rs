/// How many nodes a capture can hold in one match of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CaptureQuantifier {
    #[default]
    Zero,
    ZeroOrOne,
    ZeroOrMore,
    One,
    OneOrMore,
}

impl CaptureQuantifier {
    /// Quantifier of a capture inside `self` repeated `inner` times.
    pub(crate) fn mul(self, inner: Self) -> Self {
        use CaptureQuantifier::{One, OneOrMore, Zero, ZeroOrMore, ZeroOrOne};
        match (self, inner) {
            (Zero, _) | (_, Zero) => Zero,
            (One, other) | (other, One) => other,
            (ZeroOrOne, ZeroOrOne) => ZeroOrOne,
            (OneOrMore, OneOrMore) => OneOrMore,
            (ZeroOrOne | ZeroOrMore | OneOrMore, _) => ZeroOrMore,
        }
    }

    /// Quantifier of a capture that occurs in either of two alternatives.
    pub(crate) fn join(self, other: Self) -> Self {
        use CaptureQuantifier::{One, OneOrMore, Zero, ZeroOrMore, ZeroOrOne};
        match (self, other) {
            (left, right) if left == right => left,
            (Zero | ZeroOrOne, One) | (One, Zero | ZeroOrOne) | (Zero, ZeroOrOne) | (ZeroOrOne, Zero) => {
                ZeroOrOne
            }
            (One, OneOrMore) | (OneOrMore, One) => OneOrMore,
            _ => ZeroOrMore,
        }
    }

    /// Quantifier of a capture that occurs in two sibling positions.
    pub(crate) fn add(self, other: Self) -> Self {
        use CaptureQuantifier::{OneOrMore, Zero, ZeroOrMore, ZeroOrOne};
        match (self, other) {
            (Zero, other) | (other, Zero) => other,
            (ZeroOrOne | ZeroOrMore, ZeroOrOne | ZeroOrMore) => ZeroOrMore,
            _ => OneOrMore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CaptureQuantifier::{One, OneOrMore, Zero, ZeroOrMore, ZeroOrOne};

    #[test]
    fn repetition_widens_quantifiers() {
        assert_eq!(ZeroOrOne.mul(One), ZeroOrOne);
        assert_eq!(ZeroOrOne.mul(OneOrMore), ZeroOrMore);
        assert_eq!(OneOrMore.mul(ZeroOrOne), ZeroOrMore);
        assert_eq!(OneOrMore.mul(OneOrMore), OneOrMore);
        assert_eq!(ZeroOrMore.mul(Zero), Zero);
    }

    #[test]
    fn alternatives_join_quantifiers() {
        assert_eq!(One.join(Zero), ZeroOrOne);
        assert_eq!(One.join(One), One);
        assert_eq!(One.join(OneOrMore), OneOrMore);
        assert_eq!(OneOrMore.join(ZeroOrOne), ZeroOrMore);
        assert_eq!(Zero.join(ZeroOrMore), ZeroOrMore);
    }

    #[test]
    fn siblings_add_quantifiers() {
        assert_eq!(Zero.add(ZeroOrOne), ZeroOrOne);
        assert_eq!(One.add(One), OneOrMore);
        assert_eq!(ZeroOrOne.add(ZeroOrOne), ZeroOrMore);
        assert_eq!(ZeroOrMore.add(One), OneOrMore);
    }
}

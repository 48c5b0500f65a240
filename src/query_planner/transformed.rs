/// Result of a plan pass: whether anything changed, plus the plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformed<T> {
    Yes(T),
    No(T),
}

impl<T> Transformed<T> {
    pub fn is_yes(&self) -> bool {
        matches!(self, Transformed::Yes(_))
    }

    pub fn get_plan(self) -> T {
        match self {
            Transformed::Yes(plan) | Transformed::No(plan) => plan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_plan_unwraps_both_variants() {
        assert_eq!(Transformed::Yes(1).get_plan(), 1);
        assert_eq!(Transformed::No(2).get_plan(), 2);
        assert!(!Transformed::No(()).is_yes());
    }
}

use std::fmt;

/// Per-source planning metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCtx {
    pub entity: String,
    /// Rows of this source may be absent (optional side of an outer join).
    pub nullable: bool,
    /// Introduced by navigation expansion rather than a query root.
    pub nav_target: bool,
    pub(super) scope: usize,
}

impl fmt::Display for SourceCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity)?;
        if self.nullable {
            write!(f, " (nullable)")?;
        }
        if self.nav_target {
            write!(f, " (navigation)")?;
        }
        Ok(())
    }
}

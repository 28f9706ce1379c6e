use crate::model::Model;
use crate::prelude::{Day, Result};
use getset::{CopyGetters, Getters};
use std::fmt;
use std::sync::Arc;

/// Schedule value meaning "run on every day".
pub const EVERY_DAY: Day = -1;

pub type GlobalFn = Arc<dyn Fn(&mut Model) -> Result<()> + Send + Sync>;

/// A named action executed at the global phase of the day step, either on
/// a specific day or on every day. Its buffered actions flush before the
/// next global runs.
#[derive(Clone, Getters, CopyGetters)]
pub struct GlobalAction {
    #[getset(get = "pub")]
    name: String,
    #[getset(get_copy = "pub")]
    day: Day,
    fun: GlobalFn,
}

impl GlobalAction {
    pub fn new(fun: GlobalFn, name: impl Into<String>, day: Day) -> Self {
        GlobalAction {
            name: name.into(),
            day,
            fun,
        }
    }

    pub fn applies(&self, today: Day) -> bool {
        self.day == EVERY_DAY || self.day == today
    }

    pub(crate) fn fun(&self) -> GlobalFn {
        self.fun.clone()
    }
}

impl fmt::Debug for GlobalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalAction")
            .field("name", &self.name)
            .field("day", &self.day)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_matching() {
        let noop: GlobalFn = Arc::new(|_| Ok(()));
        let daily = GlobalAction::new(noop.clone(), "daily", EVERY_DAY);
        let once = GlobalAction::new(noop, "once", 3);
        assert!(daily.applies(0));
        assert!(daily.applies(10));
        assert!(!once.applies(2));
        assert!(once.applies(3));
    }
}

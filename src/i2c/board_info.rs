// Licensed under the Apache-2.0 license

//! Devices declared ahead of their bus.
//!
//! Board setup code records which devices live on which bus number before
//! any controller driver runs. Declaring a bus number also keeps it out of
//! dynamic allocation.

use parking_lot::RwLock;

use crate::i2c::client::I2cBoardInfo;

/// One pre-declared device.
#[derive(Debug, Clone)]
pub struct BoardInfoEntry {
    pub busnum: u32,
    pub info: I2cBoardInfo,
}

#[derive(Debug, Default)]
struct BoardInfoState {
    entries: Vec<BoardInfoEntry>,
    first_dynamic_bus_num: u32,
}

/// Append-only list of declarations plus the dynamic-numbering watermark.
#[derive(Debug, Default)]
pub struct BoardInfoRegistry {
    state: RwLock<BoardInfoState>,
}

impl BoardInfoRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `infos` for bus `busnum`.
    ///
    /// Bus numbers up to `busnum` stop being handed out dynamically.
    pub fn register(&self, busnum: u32, infos: &[I2cBoardInfo]) {
        let mut state = self.state.write();
        if busnum >= state.first_dynamic_bus_num {
            state.first_dynamic_bus_num = busnum.saturating_add(1);
        }
        state.entries.extend(infos.iter().map(|info| BoardInfoEntry {
            busnum,
            info: info.clone(),
        }));
    }

    /// Lowest bus number available for dynamic allocation.
    #[must_use]
    pub fn first_dynamic_bus_num(&self) -> u32 {
        self.state.read().first_dynamic_bus_num
    }

    /// Move the watermark past a statically claimed number.
    pub(crate) fn reserve(&self, nr: u32) {
        let mut state = self.state.write();
        if nr >= state.first_dynamic_bus_num {
            state.first_dynamic_bus_num = nr.saturating_add(1);
        }
    }

    /// Declarations targeting `busnum`, in declaration order.
    #[must_use]
    pub fn entries_for(&self, busnum: u32) -> Vec<I2cBoardInfo> {
        self.state
            .read()
            .entries
            .iter()
            .filter(|entry| entry.busnum == busnum)
            .map(|entry| entry.info.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

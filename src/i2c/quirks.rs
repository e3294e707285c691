// Licensed under the Apache-2.0 license

//! Declared adapter limitations and batch validation against them.

use crate::i2c::msg::I2cMsg;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QuirkFlags: u32 {
        /// Only two-message write-then-read style batches are supported
        const COMB = 1 << 0;
        /// First combined message must be a write
        const COMB_WRITE_FIRST = 1 << 1;
        /// Second combined message must be a read
        const COMB_READ_SECOND = 1 << 2;
        /// Both combined messages must target the same address
        const COMB_SAME_ADDR = 1 << 3;
        const NO_CLK_STRETCH = 1 << 4;
        const NO_ZERO_LEN_READ = 1 << 5;
        const NO_ZERO_LEN_WRITE = 1 << 6;
        const NO_REP_START = 1 << 7;

        /// The classic register-read shape: write address, read data
        const COMB_WRITE_THEN_READ = Self::COMB.bits()
            | Self::COMB_WRITE_FIRST.bits()
            | Self::COMB_READ_SECOND.bits()
            | Self::COMB_SAME_ADDR.bits();
        const NO_ZERO_LEN = Self::NO_ZERO_LEN_READ.bits() | Self::NO_ZERO_LEN_WRITE.bits();
    }
}

/// Limits of one adapter. A limit of zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterQuirks {
    pub flags: QuirkFlags,
    pub max_num_msgs: usize,
    pub max_write_len: u16,
    pub max_read_len: u16,
    pub max_comb_1st_msg_len: u16,
    pub max_comb_2nd_msg_len: u16,
}

/// Why a batch was refused and which message tripped the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuirkViolation {
    pub reason: &'static str,
    pub index: usize,
}

fn exceeded(val: usize, quirk: usize) -> bool {
    quirk != 0 && val > quirk
}

impl AdapterQuirks {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            flags: QuirkFlags::empty(),
            max_num_msgs: 0,
            max_write_len: 0,
            max_read_len: 0,
            max_comb_1st_msg_len: 0,
            max_comb_2nd_msg_len: 0,
        }
    }

    #[must_use]
    pub const fn flags(mut self, flags: QuirkFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub const fn max_num_msgs(mut self, max: usize) -> Self {
        self.max_num_msgs = max;
        self
    }

    #[must_use]
    pub const fn max_write_len(mut self, max: u16) -> Self {
        self.max_write_len = max;
        self
    }

    #[must_use]
    pub const fn max_read_len(mut self, max: u16) -> Self {
        self.max_read_len = max;
        self
    }

    #[must_use]
    pub const fn max_comb_lens(mut self, first: u16, second: u16) -> Self {
        self.max_comb_1st_msg_len = first;
        self.max_comb_2nd_msg_len = second;
        self
    }

    /// Validate a batch before any hardware access.
    ///
    /// In combined mode the batch may hold at most two messages; an exact pair
    /// is checked against the combined constraints and its lengths against the
    /// combined limits instead of the per-direction ones.
    ///
    /// # Errors
    ///
    /// Returns the first [`QuirkViolation`] found.
    pub fn check(&self, msgs: &[I2cMsg<'_>]) -> Result<(), QuirkViolation> {
        let q = self.flags;
        let mut max_num = self.max_num_msgs;
        let mut do_len_check = true;
        let fail = |reason, index| Err(QuirkViolation { reason, index });

        if q.contains(QuirkFlags::COMB) {
            max_num = 2;

            if let [first, second] = msgs {
                if q.contains(QuirkFlags::COMB_WRITE_FIRST) && first.is_read() {
                    return fail("1st comb msg must be write", 0);
                }
                if q.contains(QuirkFlags::COMB_READ_SECOND) && !second.is_read() {
                    return fail("2nd comb msg must be read", 1);
                }
                if q.contains(QuirkFlags::COMB_SAME_ADDR) && first.addr != second.addr {
                    return fail("comb msg only to same addr", 0);
                }
                if exceeded(first.len(), usize::from(self.max_comb_1st_msg_len)) {
                    return fail("msg too long", 0);
                }
                if exceeded(second.len(), usize::from(self.max_comb_2nd_msg_len)) {
                    return fail("msg too long", 1);
                }
                do_len_check = false;
            }
        }

        if exceeded(msgs.len(), max_num) {
            return fail("too many messages", 0);
        }

        for (index, msg) in msgs.iter().enumerate() {
            let len = msg.len();
            let (limit, zero_flag) = if msg.is_read() {
                (self.max_read_len, QuirkFlags::NO_ZERO_LEN_READ)
            } else {
                (self.max_write_len, QuirkFlags::NO_ZERO_LEN_WRITE)
            };
            if do_len_check && exceeded(len, usize::from(limit)) {
                return fail("msg too long", index);
            }
            if q.contains(zero_flag) && len == 0 {
                return fail("no zero length", index);
            }
        }
        Ok(())
    }
}

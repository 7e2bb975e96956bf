//! Register code ladders.
//!
//! Each charger setting is a discrete code indexing a monotonic table of
//! physical values (UM0836). Encoding rounds down to the nearest entry and
//! never up; past the top only an exact match is accepted.

use crate::error::{ChargerError, Result};

/// A monotonic table of physical values indexed by register code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ladder {
    name: &'static str,
    steps: &'static [i32],
    below_min: u8,
}

/// Code for charge voltages under the first table entry.
pub const LOW_VOLT_REG: u8 = 0x4E;

/// Charge voltage in mV (`CH_VOLT_LVL`).
pub const CHARGE_VOLTAGE: Ladder = Ladder {
    name: "charge-voltage",
    steps: &[
        3500, 3525, 3550, 3575, 3600, 3625, 3650, 3675, 3700, 3725, 3750, 3775, 3800, 3825,
        3850, 3875, 3900, 3925, 3950, 3975, 4000, 4025, 4050, 4060, 4070, 4080, 4090, 4100,
        4110, 4120, 4130, 4140, 4150, 4160, 4170, 4180, 4190, 4200, 4210, 4220, 4230, 4240,
        4250, 4260, 4270, 4280, 4290, 4300, 4310, 4320, 4330, 4340, 4350, 4360, 4370, 4380,
        4390, 4400, 4410, 4420, 4430, 4440, 4450, 4460, 4470, 4480, 4490, 4500, 4510, 4520,
        4530, 4540, 4550, 4560, 4570, 4580, 4590, 4600,
    ],
    below_min: LOW_VOLT_REG,
};

/// Charger current in mA: output current and main input current.
pub const CHARGER_CURRENT: Ladder = Ladder {
    name: "charger-current",
    steps: &[
        100, 200, 300, 400, 500, 600, 700, 800, 900, 1000, 1100, 1200, 1300, 1400, 1500,
    ],
    below_min: 0,
};

/// VBUS input current limit in mA (`USBCH_IPT_CRNTLVL` and the automatic
/// limit field of `USBCH_STAT2`).
pub const VBUS_INPUT_CURRENT: Ladder = Ladder {
    name: "vbus-input-current",
    steps: &[
        50, 98, 193, 290, 380, 450, 500, 600, 700, 800, 900, 1000, 1100, 1300, 1400, 1500,
    ],
    below_min: 0,
};

impl Ladder {
    /// Table name, for logs.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Number of codes.
    pub const fn len(&self) -> usize {
        self.steps.len()
    }

    /// `true` for an empty table.
    pub const fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Highest encodable value.
    pub fn top(&self) -> i32 {
        self.steps.last().copied().unwrap_or(0)
    }

    /// Convert a physical value to a register code.
    ///
    /// Values between entries round down. Values under the first entry map
    /// to the floor code. Negative values, and values past the top that do
    /// not match it exactly, are [`ChargerError::Range`].
    pub fn encode(&self, value: i32) -> Result<u8> {
        if value < 0 {
            return Err(ChargerError::Range);
        }
        let Some(&first) = self.steps.first() else {
            return Err(ChargerError::Range);
        };
        if value < first {
            return Ok(self.below_min);
        }
        let index = match self.steps.iter().position(|&step| value < step) {
            Some(above) => above.saturating_sub(1),
            None if value == self.top() => self.steps.len().saturating_sub(1),
            None => return Err(ChargerError::Range),
        };
        u8::try_from(index).map_err(|_| ChargerError::Range)
    }

    /// Physical value of a register code, if the code is in the table.
    pub fn decode(&self, code: u8) -> Option<i32> {
        self.steps.get(usize::from(code)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_sizes() {
        assert_eq!(CHARGE_VOLTAGE.len(), 78);
        assert_eq!(CHARGER_CURRENT.len(), 15);
        assert_eq!(VBUS_INPUT_CURRENT.len(), 16);
    }

    #[test]
    fn voltage_below_table_uses_low_volt_code() {
        assert_eq!(CHARGE_VOLTAGE.encode(3400), Ok(LOW_VOLT_REG));
        assert_eq!(CHARGE_VOLTAGE.encode(0), Ok(LOW_VOLT_REG));
    }

    #[test]
    fn current_below_table_uses_code_zero() {
        assert_eq!(CHARGER_CURRENT.encode(50), Ok(0));
        assert_eq!(VBUS_INPUT_CURRENT.encode(0), Ok(0));
    }

    #[test]
    fn between_entries_rounds_down() {
        assert_eq!(CHARGER_CURRENT.encode(450), Ok(3));
        assert_eq!(VBUS_INPUT_CURRENT.encode(499), Ok(5));
        assert_eq!(CHARGE_VOLTAGE.encode(4055), Ok(22));
    }

    #[test]
    fn top_requires_exact_match() {
        assert_eq!(CHARGER_CURRENT.encode(1500), Ok(14));
        assert_eq!(CHARGER_CURRENT.encode(1501), Err(ChargerError::Range));
        assert_eq!(CHARGE_VOLTAGE.encode(4600), Ok(77));
        assert_eq!(CHARGE_VOLTAGE.encode(4605), Err(ChargerError::Range));
    }

    #[test]
    fn negative_is_out_of_range() {
        assert_eq!(CHARGER_CURRENT.encode(-1), Err(ChargerError::Range));
    }

    #[test]
    fn decode_past_table_is_none() {
        assert_eq!(VBUS_INPUT_CURRENT.decode(15), Some(1500));
        assert_eq!(VBUS_INPUT_CURRENT.decode(16), None);
        assert_eq!(CHARGE_VOLTAGE.decode(LOW_VOLT_REG), None);
    }
}

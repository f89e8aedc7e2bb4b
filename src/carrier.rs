use crate::constants::{
    GLONASS_G1_CHANNEL_SPACING_HZ, GLONASS_G2_CHANNEL_SPACING_HZ, SPEED_OF_LIGHT_M_S,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Carrier signals we form differences on.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Eq, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Carrier {
    /// L1 (GPS/QZSS/SBAS) same center frequency as E1 and B1aB1c
    #[default]
    L1,
    /// L2 (GPS/QZSS)
    L2,
    /// L5 (GPS/QZSS/SBAS) same frequency as E5A
    L5,
    /// E1 (Galileo)
    E1,
    /// E5A (Galileo) same frequency as L5
    E5A,
    /// E5B (Galileo)
    E5B,
    /// B1I (BDS)
    B1I,
    /// B2I/B2B (BDS) same frequency as E5b
    B2iB2b,
    /// G1 (Glonass FDMA, center frequency)
    G1,
    /// G2 (Glonass FDMA, center frequency)
    G2,
}

impl std::fmt::Display for Carrier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
            Self::L5 => write!(f, "L5"),
            Self::E1 => write!(f, "E1"),
            Self::E5A => write!(f, "E5A"),
            Self::E5B => write!(f, "E5B"),
            Self::B1I => write!(f, "B1I"),
            Self::B2iB2b => write!(f, "B2I/B2B"),
            Self::G1 => write!(f, "G1"),
            Self::G2 => write!(f, "G2"),
        }
    }
}

impl Carrier {
    /// Center frequency in Hz. For Glonass FDMA signals this is the channel-0
    /// frequency, see [Self::frequency_hz_fdma].
    pub fn frequency_hz(&self) -> f64 {
        match self {
            Self::L1 | Self::E1 => 1575.42E6_f64,
            Self::L2 => 1227.60E6_f64,
            Self::L5 | Self::E5A => 1176.45E6_f64,
            Self::E5B | Self::B2iB2b => 1207.14E6_f64,
            Self::B1I => 1561.098E6_f64,
            Self::G1 => 1602.0E6_f64,
            Self::G2 => 1246.0E6_f64,
        }
    }

    /// Frequency in Hz, accounting for the Glonass FDMA channel
    /// when one applies. CDMA signals disregard the channel.
    pub fn frequency_hz_fdma(&self, channel: Option<i8>) -> f64 {
        let k = channel.unwrap_or(0) as f64;
        match self {
            Self::G1 => self.frequency_hz() + k * GLONASS_G1_CHANNEL_SPACING_HZ,
            Self::G2 => self.frequency_hz() + k * GLONASS_G2_CHANNEL_SPACING_HZ,
            _ => self.frequency_hz(),
        }
    }

    /// Wavelength in meters (channel-0 for FDMA signals).
    pub fn wavelength_m(&self) -> f64 {
        SPEED_OF_LIGHT_M_S / self.frequency_hz()
    }

    /// Wavelength in meters, accounting for the Glonass FDMA channel.
    pub fn wavelength_m_fdma(&self, channel: Option<i8>) -> f64 {
        SPEED_OF_LIGHT_M_S / self.frequency_hz_fdma(channel)
    }

    /// Frequency slot this signal occupies in the estimation process:
    /// 0 for the primary (L1) band, 1 for the subsidary band.
    pub fn slot(&self) -> usize {
        match self {
            Self::L1 | Self::E1 | Self::B1I | Self::G1 => 0,
            Self::L2 | Self::L5 | Self::E5A | Self::E5B | Self::B2iB2b | Self::G2 => 1,
        }
    }

    /// True if this signal is Glonass FDMA and contributes to the
    /// inter frequency bias parameter.
    pub fn is_fdma(&self) -> bool {
        matches!(self, Self::G1 | Self::G2)
    }
}

#[cfg(test)]
mod test {
    use super::Carrier;

    #[test]
    fn fdma_channels() {
        assert_eq!(Carrier::G1.frequency_hz_fdma(Some(0)), 1602.0E6);
        assert_eq!(Carrier::G1.frequency_hz_fdma(Some(1)), 1602.0E6 + 562.5E3);
        assert_eq!(Carrier::G2.frequency_hz_fdma(Some(-7)), 1246.0E6 - 7.0 * 437.5E3);
        // CDMA signals do not care
        assert_eq!(Carrier::L1.frequency_hz_fdma(Some(5)), 1575.42E6);
    }

    #[test]
    fn frequency_slots() {
        assert_eq!(Carrier::L1.slot(), 0);
        assert_eq!(Carrier::E1.slot(), 0);
        assert_eq!(Carrier::G1.slot(), 0);
        assert_eq!(Carrier::L2.slot(), 1);
        assert_eq!(Carrier::E5B.slot(), 1);
        assert_eq!(Carrier::G2.slot(), 1);
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// V4L2 packs fourcc codes as `a | b << 8 | c << 16 | d << 24`, independent of
// the host byte order.
#![forbid(unsafe_code)]

use core::{fmt, result::Result};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Planar YUV 4:2:0 (`V4L2_PIX_FMT_YUV420`).
    pub const YUV420: FourCC = FourCC(*b"YU12");

    /// H.264 elementary stream with start codes (`V4L2_PIX_FMT_H264`).
    pub const H264: FourCC = FourCC(*b"H264");

    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub const fn from_u32(val: u32) -> FourCC {
        FourCC(val.to_le_bytes())
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(buf: &[u8; 4]) -> FourCC {
        FourCC(*buf)
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> FourCC {
        FourCC::from_u32(val)
    }
}

impl From<FourCC> for u32 {
    fn from(val: FourCC) -> Self {
        val.to_u32()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match core::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            // Drivers occasionally report codes with non-printable bytes.
            Err(_) => {
                for b in self.0 {
                    write!(f, "{}", core::ascii::escape_default(b))?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_tuple("FourCC")
            .field(&format_args!("{}", self))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_packing() {
        // v4l2_fourcc('Y', 'U', '1', '2')
        assert_eq!(FourCC::YUV420.to_u32(), 0x3231_5559);
        assert_eq!(u32::from(FourCC::H264), 0x3436_3248);
        assert_eq!(FourCC::from(0x3231_5559), FourCC::YUV420);
    }

    #[test]
    fn test_display() {
        assert_eq!(FourCC::H264.to_string(), "H264");
        assert_eq!(FourCC([b'A', 0xff, b'C', b'D']).to_string(), "A\\xffCD");
        assert_eq!(format!("{:?}", FourCC::YUV420), "FourCC(YU12)");
    }
}

//! Quality descriptors and packed protection flags.
//!
//! All types here are packed into a single wire byte; accessors read and the
//! `set_*` builders write individual bits without touching the others.

macro_rules! flag_byte {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$fdoc:meta])* $get:ident, $set:ident = $mask:expr; )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
        #[repr(transparent)]
        pub struct $name(u8);

        impl $name {
            /// All flags cleared.
            pub const GOOD: Self = Self(0);

            /// Create from the raw wire byte (unused bits are dropped).
            #[inline(always)]
            pub const fn from_raw(raw: u8) -> Self {
                Self(raw & Self::MASK)
            }

            /// Get the raw wire byte.
            #[inline(always)]
            pub const fn as_raw(&self) -> u8 {
                self.0
            }

            /// Check that no flag is set.
            #[inline(always)]
            pub const fn is_good(&self) -> bool {
                self.0 == 0
            }

            const MASK: u8 = 0 $( | $mask )+;

            $(
                $(#[$fdoc])*
                #[inline(always)]
                pub const fn $get(&self) -> bool {
                    (self.0 & $mask) != 0
                }

                #[doc = concat!("Set the `", stringify!($get), "` flag.")]
                #[inline(always)]
                pub const fn $set(mut self, value: bool) -> Self {
                    if value {
                        self.0 |= $mask;
                    } else {
                        self.0 &= !$mask;
                    }
                    self
                }
            )+
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut set = f.debug_set();
                $(
                    if self.$get() {
                        set.entry(&stringify!($get));
                    }
                )+
                set.finish()
            }
        }
    };
}

flag_byte! {
    /// Quality descriptor (QDS), also the quality part of SIQ/DIQ/VTI bytes.
    ///
    /// ```text
    /// bit:  7    6    5    4    3..1   0
    ///       IV   NT   SB   BL   -      OV
    /// ```
    QualityDescriptor {
        /// Overflow (OV): value beyond the predefined range
        overflow, set_overflow = 0x01;
        /// Blocked (BL)
        blocked, set_blocked = 0x10;
        /// Substituted (SB)
        substituted, set_substituted = 0x20;
        /// Not topical (NT): value is outdated
        not_topical, set_not_topical = 0x40;
        /// Invalid (IV)
        invalid, set_invalid = 0x80;
    }
}

impl QualityDescriptor {
    /// Invalid quality.
    pub const INVALID: Self = Self(0x80);
}

flag_byte! {
    /// Quality descriptor for protection equipment events (QDP).
    QualityDescriptorP {
        /// Elapsed time invalid (EI)
        elapsed_time_invalid, set_elapsed_time_invalid = 0x08;
        /// Blocked (BL)
        blocked, set_blocked = 0x10;
        /// Substituted (SB)
        substituted, set_substituted = 0x20;
        /// Not topical (NT)
        not_topical, set_not_topical = 0x40;
        /// Invalid (IV)
        invalid, set_invalid = 0x80;
    }
}

flag_byte! {
    /// Start events of protection equipment (SPE).
    StartEvent {
        /// General start of operation (GS)
        general_start, set_general_start = 0x01;
        /// Start of operation phase L1
        start_l1, set_start_l1 = 0x02;
        /// Start of operation phase L2
        start_l2, set_start_l2 = 0x04;
        /// Start of operation phase L3
        start_l3, set_start_l3 = 0x08;
        /// Start of operation IE (earth current)
        start_earth_current, set_start_earth_current = 0x10;
        /// Start of operation in reverse direction
        start_reverse, set_start_reverse = 0x20;
    }
}

flag_byte! {
    /// Output circuit information of protection equipment (OCI).
    OutputCircuitInfo {
        /// General command to output circuit (GC)
        general_command, set_general_command = 0x01;
        /// Command to output circuit phase L1
        command_l1, set_command_l1 = 0x02;
        /// Command to output circuit phase L2
        command_l2, set_command_l2 = 0x04;
        /// Command to output circuit phase L3
        command_l3, set_command_l3 = 0x08;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_descriptor_bits() {
        let q = QualityDescriptor::from_raw(0x91);
        assert!(q.invalid());
        assert!(q.blocked());
        assert!(q.overflow());
        assert!(!q.substituted());
        assert!(!q.not_topical());
        assert_eq!(q.as_raw(), 0x91);
    }

    #[test]
    fn test_quality_descriptor_masks_value_bits() {
        // SIQ byte with SPI=1 must not leak into quality
        let q = QualityDescriptor::from_raw(0x01 | 0x40);
        assert!(q.not_topical());
        let siq = QualityDescriptor::from_raw(0xFE);
        assert_eq!(siq.as_raw(), 0xF0);
    }

    #[test]
    fn test_quality_builder() {
        let q = QualityDescriptor::GOOD
            .set_invalid(true)
            .set_substituted(true)
            .set_invalid(false);
        assert_eq!(q.as_raw(), 0x20);
        assert!(!q.is_good());
        assert!(QualityDescriptor::default().is_good());
        assert!(QualityDescriptor::INVALID.invalid());
    }

    #[test]
    fn test_all_flag_combinations_roundtrip() {
        for raw in 0u8..=255 {
            let q = QualityDescriptor::from_raw(raw);
            assert_eq!(QualityDescriptor::from_raw(q.as_raw()), q);
            assert_eq!(q.as_raw() & 0x0E, 0);
        }
    }

    #[test]
    fn test_qdp_and_events() {
        let qdp = QualityDescriptorP::from_raw(0xFF);
        assert_eq!(qdp.as_raw(), 0xF8);
        assert!(qdp.elapsed_time_invalid());

        let spe = StartEvent::GOOD.set_general_start(true).set_start_l3(true);
        assert_eq!(spe.as_raw(), 0x09);

        let oci = OutputCircuitInfo::from_raw(0xFF);
        assert_eq!(oci.as_raw(), 0x0F);
    }

    #[test]
    fn test_debug_lists_flags() {
        let q = QualityDescriptor::GOOD.set_blocked(true);
        assert_eq!(format!("{:?}", q), "{\"blocked\"}");
    }
}

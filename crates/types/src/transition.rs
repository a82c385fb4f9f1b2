use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// How a navigation happened: a core type in the low byte plus qualifier bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageTransition(u32);

impl PageTransition {
    pub const LINK: Self = Self(0);
    pub const TYPED: Self = Self(1);
    pub const AUTO_BOOKMARK: Self = Self(2);
    pub const AUTO_SUBFRAME: Self = Self(3);
    pub const MANUAL_SUBFRAME: Self = Self(4);
    pub const GENERATED: Self = Self(5);
    pub const AUTO_TOPLEVEL: Self = Self(6);
    pub const FORM_SUBMIT: Self = Self(7);
    pub const RELOAD: Self = Self(8);
    pub const KEYWORD: Self = Self(9);
    pub const KEYWORD_GENERATED: Self = Self(10);

    pub const CORE_MASK: u32 = 0xFF;

    pub const FORWARD_BACK: u32 = 0x0100_0000;
    pub const FROM_ADDRESS_BAR: u32 = 0x0200_0000;
    pub const HOME_PAGE: u32 = 0x0400_0000;
    pub const FROM_API: u32 = 0x0800_0000;
    /// First visit of a redirect chain. Its referrer is an ordinary
    /// navigation, not a redirect hop.
    pub const CHAIN_START: u32 = 0x1000_0000;
    pub const CHAIN_END: u32 = 0x2000_0000;
    pub const CLIENT_REDIRECT: u32 = 0x4000_0000;
    pub const SERVER_REDIRECT: u32 = 0x8000_0000;
    pub const IS_REDIRECT_MASK: u32 = 0xC000_0000;
    pub const QUALIFIER_MASK: u32 = 0xFFFF_FF00;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn core(self) -> Self {
        Self(self.0 & Self::CORE_MASK)
    }

    pub const fn qualifiers(self) -> u32 {
        self.0 & Self::QUALIFIER_MASK
    }

    pub const fn with_qualifiers(self, qualifiers: u32) -> Self {
        Self(self.0 | (qualifiers & Self::QUALIFIER_MASK))
    }

    /// Compares core types only, ignoring qualifiers.
    pub const fn core_type_is(self, other: Self) -> bool {
        self.core().0 == other.core().0
    }

    pub const fn has_qualifier(self, qualifier: u32) -> bool {
        self.0 & qualifier != 0
    }

    pub const fn is_chain_start(self) -> bool {
        self.has_qualifier(Self::CHAIN_START)
    }

    pub const fn is_chain_end(self) -> bool {
        self.has_qualifier(Self::CHAIN_END)
    }

    pub const fn is_redirect(self) -> bool {
        self.has_qualifier(Self::IS_REDIRECT_MASK)
    }

    pub const fn is_main_frame(self) -> bool {
        !self.core_type_is(Self::AUTO_SUBFRAME) && !self.core_type_is(Self::MANUAL_SUBFRAME)
    }

    fn core_name(self) -> &'static str {
        match self.core().0 {
            0 => "link",
            1 => "typed",
            2 => "auto_bookmark",
            3 => "auto_subframe",
            4 => "manual_subframe",
            5 => "generated",
            6 => "auto_toplevel",
            7 => "form_submit",
            8 => "reload",
            9 => "keyword",
            10 => "keyword_generated",
            _ => "unknown",
        }
    }
}

impl Default for PageTransition {
    fn default() -> Self {
        Self::LINK
    }
}

impl fmt::Display for PageTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.core_name())?;
        for (bit, name) in [
            (Self::CHAIN_START, "chain_start"),
            (Self::CHAIN_END, "chain_end"),
            (Self::CLIENT_REDIRECT, "client_redirect"),
            (Self::SERVER_REDIRECT, "server_redirect"),
        ] {
            if self.has_qualifier(bit) {
                write!(f, "|{}", name)?;
            }
        }
        Ok(())
    }
}

impl FromStr for PageTransition {
    type Err = TypesError;

    /// Accepts `core[|qualifier...]`, e.g. `link|chain_start|chain_end`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('|').map(|p| p.trim().to_lowercase().replace('-', "_"));
        let core = match parts.next().as_deref() {
            Some("link") => Self::LINK,
            Some("typed") => Self::TYPED,
            Some("auto_bookmark") => Self::AUTO_BOOKMARK,
            Some("auto_subframe") => Self::AUTO_SUBFRAME,
            Some("manual_subframe") => Self::MANUAL_SUBFRAME,
            Some("generated") => Self::GENERATED,
            Some("auto_toplevel") => Self::AUTO_TOPLEVEL,
            Some("form_submit") => Self::FORM_SUBMIT,
            Some("reload") => Self::RELOAD,
            Some("keyword") => Self::KEYWORD,
            Some("keyword_generated") => Self::KEYWORD_GENERATED,
            _ => return Err(TypesError::InvalidTransition(s.to_string())),
        };

        parts.try_fold(core, |acc, qualifier| {
            let bit = match qualifier.as_str() {
                "chain_start" => Self::CHAIN_START,
                "chain_end" => Self::CHAIN_END,
                "client_redirect" => Self::CLIENT_REDIRECT,
                "server_redirect" => Self::SERVER_REDIRECT,
                "from_address_bar" => Self::FROM_ADDRESS_BAR,
                "forward_back" => Self::FORWARD_BACK,
                _ => return Err(TypesError::InvalidTransition(s.to_string())),
            };
            Ok(acc.with_qualifiers(bit))
        })
    }
}

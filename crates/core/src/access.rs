use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Access and property flags of classes, fields and methods.
    ///
    /// Some bits carry a different meaning per member kind, so several
    /// constants share a value (`SUPER`/`SYNCHRONIZED`, `VOLATILE`/`BRIDGE`,
    /// `TRANSIENT`/`VARARGS`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const BRIDGE = 0x0040;
        const TRANSIENT = 0x0080;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

impl Default for AccessFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl AccessFlags {
    /// Keyword rendering for listings, e.g. `public static final`.
    pub fn keywords(self, method: bool) -> String {
        let mut words = Vec::new();
        if self.contains(Self::PUBLIC) {
            words.push("public");
        }
        if self.contains(Self::PRIVATE) {
            words.push("private");
        }
        if self.contains(Self::PROTECTED) {
            words.push("protected");
        }
        if self.contains(Self::STATIC) {
            words.push("static");
        }
        if self.contains(Self::FINAL) {
            words.push("final");
        }
        if method && self.contains(Self::SYNCHRONIZED) {
            words.push("synchronized");
        }
        if !method && self.contains(Self::VOLATILE) {
            words.push("volatile");
        }
        if !method && self.contains(Self::TRANSIENT) {
            words.push("transient");
        }
        if self.contains(Self::NATIVE) {
            words.push("native");
        }
        if self.contains(Self::ABSTRACT) {
            words.push("abstract");
        }
        words.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_depend_on_member_kind() {
        let flags = AccessFlags::PUBLIC | AccessFlags::SYNCHRONIZED;
        assert_eq!(flags.keywords(true), "public synchronized");
        assert_eq!(flags.keywords(false), "public");
    }

    #[test]
    fn serializes_as_flag_names() {
        let flags = AccessFlags::PUBLIC | AccessFlags::STATIC;
        let json = serde_json::to_string(&flags).unwrap();
        let back: AccessFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, flags);
    }
}

use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    /// Names for the tags this toolkit prints, keyed by tag number. Display
    /// only; decoding never dispatches through this table.
    pub static ref ELEMENTS: HashMap<u16, &'static str> = HashMap::from([
        (0x0062, "FCP Template"),
        (0x006f, "FCI Template"),
        (0x0080, "File Size"),
        (0x0081, "Total File Size"),
        (0x0082, "File Descriptor"),
        (0x0083, "File Identifier"),
        (0x0084, "DF Name"),
        (0x0085, "Proprietary Information"),
        (0x0086, "Proprietary Security Attributes"),
        (0x008a, "Life Cycle Status"),
        (0x008b, "Referenced Security Attributes"),
        (0x008c, "Compact Security Attributes"),
        (0x00a5, "Proprietary Template"),
        (0x00ab, "Expanded Security Attributes"),
        (0x0061, "Application Template"),
        (0x004f, "AID"),
        (0x0050, "Application Label"),
        (0x00c4, "Load File Data Block"),
        (0x00e2, "Rule Entry"),
        (0x00e1, "Rule Reference"),
        (0x00e3, "Access Rule"),
        (0x00c9, "Install Parameters"),
        (0x009e, "Security Condition Byte"),
        (0x0090, "Always"),
        (0x0097, "Never"),
        (0x00a0, "OR Template"),
        (0x00a7, "AND Template"),
        (0x00db, "Permission"),
        (0x00d0, "APDU Rule"),
    ]);
}

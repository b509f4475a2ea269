//! The fixed-arity node record and predicate step encoding.
//!
//! A node crosses the boundary as six `u32` words: the low and high halves
//! of its 64-bit id followed by four opaque context words the native engine
//! needs to resolve the node again.

/// Words per node record.
pub const NODE_FIELD_COUNT: usize = 6;

/// Type id reported for error and unknown nodes. Never specialized.
pub const ERROR_TYPE_ID: u16 = 0xFFFF;

/// Raw words of one marshaled node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NodeFields(pub [u32; NODE_FIELD_COUNT]);

impl NodeFields {
    pub const NULL: Self = Self([0; NODE_FIELD_COUNT]);

    pub fn new(id: u64, context: [u32; 4]) -> Self {
        let [c0, c1, c2, c3] = context;
        Self([id as u32, (id >> 32) as u32, c0, c1, c2, c3])
    }

    pub fn from_slice(words: &[u32]) -> Self {
        let mut fields = [0; NODE_FIELD_COUNT];
        fields.copy_from_slice(&words[..NODE_FIELD_COUNT]);
        Self(fields)
    }

    /// The 64-bit node id; `0` means "no node".
    pub fn id(&self) -> u64 {
        u64::from(self.0[0]) | (u64::from(self.0[1]) << 32)
    }

    pub fn is_null(&self) -> bool {
        self.id() == 0
    }

    pub fn context(&self) -> [u32; 4] {
        [self.0[2], self.0[3], self.0[4], self.0[5]]
    }

    pub fn words(&self) -> &[u32; NODE_FIELD_COUNT] {
        &self.0
    }
}

/// Kind of one step in a raw predicate descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateStepType {
    /// Terminates a predicate.
    Done,
    /// References a capture by id.
    Capture,
    /// A literal string value.
    String,
}

impl PredicateStepType {
    /// Decode from the wire representation.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Done),
            1 => Some(Self::Capture),
            2 => Some(Self::String),
            _ => None,
        }
    }
}

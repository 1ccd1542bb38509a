use std::fmt::{Display, Formatter};

macro_rules! native_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

native_id!(
    /// An opaque bundle of primitives and images.
    ResourceId
);
native_id!(
    /// Process-unique while loaded. Primitives and images share this id space.
    AssetId
);
native_id!(VertexBufferId);
native_id!(MorphTargetBufferId);
native_id!(
    /// Key of a deduplicated skinning dataset that may be shared by several primitives.
    CompactSkinningDataId
);

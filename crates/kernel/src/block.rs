use std::collections::BTreeMap;

/// Block id of air. Also used to replace ids the registry does not know.
pub const AIR: u16 = 0;

/// Highest id representable in a section (`Blocks` byte + `Add` nibble).
pub const MAX_BLOCK_ID: u16 = 0x0fff;

/// A block type known to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockType {
    pub id: u16,
    pub name: &'static str,
}

const fn block(id: u16, name: &'static str) -> BlockType {
    BlockType { id, name }
}

const STANDARD: &[BlockType] = &[
    block(0, "air"),
    block(1, "stone"),
    block(2, "grass"),
    block(3, "dirt"),
    block(4, "cobblestone"),
    block(5, "planks"),
    block(6, "sapling"),
    block(7, "bedrock"),
    block(8, "flowing_water"),
    block(9, "water"),
    block(10, "flowing_lava"),
    block(11, "lava"),
    block(12, "sand"),
    block(13, "gravel"),
    block(14, "gold_ore"),
    block(15, "iron_ore"),
    block(16, "coal_ore"),
    block(17, "log"),
    block(18, "leaves"),
    block(20, "glass"),
    block(24, "sandstone"),
    block(31, "tallgrass"),
    block(35, "wool"),
    block(37, "yellow_flower"),
    block(38, "red_flower"),
    block(49, "obsidian"),
    block(50, "torch"),
    block(54, "chest"),
    block(56, "diamond_ore"),
    block(78, "snow_layer"),
    block(79, "ice"),
    block(80, "snow"),
    block(81, "cactus"),
    block(82, "clay"),
    block(87, "netherrack"),
    block(88, "soul_sand"),
    block(89, "glowstone"),
    block(121, "end_stone"),
];

/// Block-type table consulted when resolving loaded chunk sections.
///
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    types: BTreeMap<u16, BlockType>,
}

impl BlockRegistry {
    /// A registry holding only air.
    pub fn empty() -> Self {
        let mut types = BTreeMap::new();
        types.insert(AIR, STANDARD[0]);
        Self { types }
    }

    /// The built-in block table.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for ty in STANDARD {
            registry.register(*ty);
        }
        registry
    }

    /// Add a block type. Returns `false` if the id was taken or out of range.
    pub fn register(&mut self, ty: BlockType) -> bool {
        if ty.id > MAX_BLOCK_ID {
            return false;
        }
        if let Some(existing) = self.types.get(&ty.id) {
            return *existing == ty;
        }
        self.types.insert(ty.id, ty);
        true
    }

    pub fn get(&self, id: u16) -> Option<&BlockType> {
        self.types.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.types.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_has_air_and_stone() {
        let r = BlockRegistry::standard();
        assert!(r.contains(AIR));
        assert_eq!(r.get(1).unwrap().name, "stone");
        assert!(!r.contains(19));
    }

    #[test]
    fn register_rejects_conflicts_and_out_of_range() {
        let mut r = BlockRegistry::empty();
        assert!(r.register(block(300, "custom")));
        assert!(r.register(block(300, "custom")));
        assert!(!r.register(block(300, "other")));
        assert!(!r.register(block(0x1000, "too_big")));
        assert_eq!(r.len(), 2);
    }
}

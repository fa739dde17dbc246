use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{Page, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, NodeType};

// Node header layout:
//   node_type: u8 (1 = leaf, 2 = internal)
//   size: u16
//   max_size: u16
//   parent_page_id: i32
//   next_page_id: i32 (leaf chain; INVALID for internal nodes)
pub(crate) const NODE_HEADER_SIZE: usize = 13;

const LEAF_TAG: u8 = 1;
const INTERNAL_TAG: u8 = 2;

/// Encode a node into the page image. Keys are bincode-encoded with a u16
/// length prefix; leaf values are 8-byte RIDs, internal values 4-byte child
/// page ids.
pub fn serialize_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize + Ord + Clone + Default,
{
    page.data.fill(0);
    page.data[0] = match node.node_type {
        NodeType::Leaf => LEAF_TAG,
        NodeType::Internal => INTERNAL_TAG,
    };
    let size = node.size();
    LittleEndian::write_u16(&mut page.data[1..3], size as u16);
    LittleEndian::write_u16(&mut page.data[3..5], node.max_size as u16);
    LittleEndian::write_i32(&mut page.data[5..9], node.parent_page_id);
    LittleEndian::write_i32(&mut page.data[9..13], node.next_page_id);

    let mut offset = NODE_HEADER_SIZE;
    for key in &node.keys {
        let bytes = bincode::serialize(key)
            .map_err(|e| BTreeError::KeySerialization(e.to_string()))?;
        if offset + 2 + bytes.len() > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }
        LittleEndian::write_u16(&mut page.data[offset..offset + 2], bytes.len() as u16);
        offset += 2;
        page.data[offset..offset + bytes.len()].copy_from_slice(&bytes);
        offset += bytes.len();
    }

    match node.node_type {
        NodeType::Leaf => {
            for value in &node.values {
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_i32(&mut page.data[offset..offset + 4], value.page_id);
                LittleEndian::write_u32(&mut page.data[offset + 4..offset + 8], value.slot);
                offset += 8;
            }
        }
        NodeType::Internal => {
            for child in &node.children {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_i32(&mut page.data[offset..offset + 4], *child);
                offset += 4;
            }
        }
    }
    Ok(())
}

/// Decode the node stored in a page image.
pub fn deserialize_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: DeserializeOwned + Ord + Clone + Default,
{
    let node_type = match page.data[0] {
        LEAF_TAG => NodeType::Leaf,
        INTERNAL_TAG => NodeType::Internal,
        other => {
            return Err(BTreeError::Corrupt(format!(
                "page {} has invalid node tag {}",
                page.page_id, other
            )))
        }
    };
    let size = LittleEndian::read_u16(&page.data[1..3]) as usize;
    let max_size = LittleEndian::read_u16(&page.data[3..5]) as usize;
    let parent_page_id = LittleEndian::read_i32(&page.data[5..9]);
    let next_page_id = LittleEndian::read_i32(&page.data[9..13]);

    let mut offset = NODE_HEADER_SIZE;
    let mut keys = Vec::with_capacity(size);
    for _ in 0..size {
        if offset + 2 > PAGE_SIZE {
            return Err(BTreeError::Corrupt("key array past page end".into()));
        }
        let len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
        offset += 2;
        if offset + len > PAGE_SIZE {
            return Err(BTreeError::Corrupt("key bytes past page end".into()));
        }
        let key = bincode::deserialize(&page.data[offset..offset + len])
            .map_err(|e| BTreeError::KeySerialization(e.to_string()))?;
        offset += len;
        keys.push(key);
    }

    let mut node = BTreeNode {
        node_type,
        max_size,
        page_id: page.page_id,
        parent_page_id,
        keys,
        values: Vec::new(),
        children: Vec::new(),
        next_page_id,
    };
    match node_type {
        NodeType::Leaf => {
            let mut values = Vec::with_capacity(size);
            for _ in 0..size {
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::Corrupt("value array past page end".into()));
                }
                let page_id = LittleEndian::read_i32(&page.data[offset..offset + 4]);
                let slot = LittleEndian::read_u32(&page.data[offset + 4..offset + 8]);
                values.push(Rid::new(page_id, slot));
                offset += 8;
            }
            node.values = values;
        }
        NodeType::Internal => {
            let mut children = Vec::with_capacity(size);
            for _ in 0..size {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::Corrupt("child array past page end".into()));
                }
                let child = LittleEndian::read_i32(&page.data[offset..offset + 4]);
                if child == INVALID_PAGE_ID {
                    return Err(BTreeError::Corrupt("invalid child page id".into()));
                }
                children.push(child);
                offset += 4;
            }
            node.children = children;
        }
    }
    Ok(node)
}

/// Default entry capacity for a node of key type `K`: sized so `max_size + 1`
/// entries always fit in one page during a split.
pub fn default_max_size<K>() -> usize {
    let entry = std::mem::size_of::<K>() + 2 + 8;
    ((PAGE_SIZE - NODE_HEADER_SIZE - 64) / entry).saturating_sub(1)
}

//! Merkle tree accumulator with a sorted-leaves universal variant.
//!
//! The tree is the classic array layout: `2n − 1` nodes for `n` leaves
//! (`n` a power of two, data zero-padded), root at index 0, children of
//! node `i` at `2i + 1` / `2i + 2`, leaf `j` at `j + n − 1`.
//!
//! Leaf and internal hashes are **domain separated**: a leaf hashes as
//! `SHA-256(0x00 ∥ x)`, an internal node as `SHA-256(0x01 ∥ left ∥ right)`.
//! Without the prefix a second-preimage attack could present an internal
//! node as a leaf.
//!
//! Membership proofs are `(side, sibling)` lists from leaf to root, with
//! `side` naming where the *sibling* sits. The sorted variant keeps the
//! leaves in byte-lexicographic order (padding included) plus a permutation
//! map back to the caller's indexing, which buys non-membership proofs:
//! exhibit the would-be neighbours, prove both memberships, and let the
//! verifier recompute the two leaf indices from the proofs' direction bits
//! to confirm adjacency and that the neighbours bracket the queried value.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::acc::{Accumulator, UniversalAccumulator};

/// SHA-256 digest width.
pub const HASH_LEN: usize = 32;

/// A node hash.
pub type NodeHash = [u8; HASH_LEN];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Which side of the path the *sibling* hash sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    L,
    R,
}

impl Side {
    fn as_str(self) -> &'static str {
        match self {
            Side::L => "L",
            Side::R => "R",
        }
    }
}

impl Serialize for Side {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Side {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "L" => Ok(Side::L),
            "R" => Ok(Side::R),
            other => Err(de::Error::custom(format!("invalid proof side {other:?}"))),
        }
    }
}

/// One step of a membership proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub side: Side,
    #[serde(with = "serde_bytes")]
    pub sibling: Vec<u8>,
}

/// Membership proof: steps from the leaf's sibling up to the root's child.
pub type MerkleProof = Vec<ProofStep>;

fn hash_leaf(x: &[u8]) -> NodeHash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(x);
    hasher.finalize().into()
}

fn hash_node(left: &[u8], right: &[u8]) -> NodeHash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// A fully materialised Merkle tree over zero-padded data.
pub struct MerkleTree {
    nodes: Vec<NodeHash>,
    leaf_count: usize,
    data: Vec<Vec<u8>>,
}

impl MerkleTree {
    /// Builds a tree over `data`, zero-padding to the next power of two.
    pub fn from_data(data: &[Vec<u8>]) -> MerkleTree {
        let mut padded = data.to_vec();
        let n = padded.len().max(1);
        let target = n.next_power_of_two();
        padded.resize(target, Vec::new());
        let nodes = Self::compute_nodes(&padded);
        MerkleTree {
            nodes,
            leaf_count: target,
            data: padded,
        }
    }

    /// Rebuilds a tree from transmitted parts, checking consistency.
    ///
    /// A non-power-of-two data length or a node array that does not
    /// recompute is an invariant violation, not a runtime condition.
    pub fn from_parts(nodes: Vec<NodeHash>, data: Vec<Vec<u8>>) -> MerkleTree {
        assert!(
            data.len().is_power_of_two(),
            "merkle data length must be a power of two"
        );
        assert_eq!(nodes.len(), 2 * data.len() - 1, "node array has wrong size");
        assert_eq!(nodes, Self::compute_nodes(&data), "node array does not recompute");
        let leaf_count = data.len();
        MerkleTree {
            nodes,
            leaf_count,
            data,
        }
    }

    fn compute_nodes(padded: &[Vec<u8>]) -> Vec<NodeHash> {
        let n = padded.len();
        debug_assert!(n.is_power_of_two());
        let mut nodes = vec![[0u8; HASH_LEN]; 2 * n - 1];
        for (i, x) in padded.iter().enumerate() {
            nodes[i + n - 1] = hash_leaf(x);
        }
        for i in (0..n - 1).rev() {
            nodes[i] = hash_node(&nodes[2 * i + 1], &nodes[2 * i + 2]);
        }
        nodes
    }

    /// The root hash.
    pub fn root(&self) -> NodeHash {
        self.nodes[0]
    }

    /// Number of leaves (after padding).
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// The padded leaf data.
    pub fn leaves(&self) -> &[Vec<u8>] {
        &self.data
    }

    /// Membership proof for leaf `index`.
    pub fn proof(&self, index: usize) -> MerkleProof {
        assert!(index < self.leaf_count, "leaf index out of range");
        let mut cur = index + self.leaf_count - 1;
        let mut out = Vec::new();
        while cur > 0 {
            if cur % 2 == 1 {
                out.push(ProofStep {
                    side: Side::R,
                    sibling: self.nodes[cur + 1].to_vec(),
                });
            } else {
                out.push(ProofStep {
                    side: Side::L,
                    sibling: self.nodes[cur - 1].to_vec(),
                });
            }
            cur = (cur - 1) / 2;
        }
        out
    }

    /// Checks whether leaf `index` currently holds `x`.
    pub fn check_present(&self, index: usize, x: &[u8]) -> bool {
        Self::check_proof(&self.root(), x, &self.proof(index))
    }

    /// Verifies a membership proof against a root.
    pub fn check_proof(root: &NodeHash, x: &[u8], proof: &MerkleProof) -> bool {
        let mut cur = hash_leaf(x);
        for step in proof {
            cur = match step.side {
                Side::R => hash_node(&cur, &step.sibling),
                Side::L => hash_node(&step.sibling, &cur),
            };
        }
        cur == *root
    }
}

/// Reconstructs a leaf index from a proof's direction bits: the sibling
/// sitting on the left means the path node is a right child (bit 1), and
/// the step closest to the leaf is the least significant bit.
fn leaf_index_of(proof: &MerkleProof) -> u64 {
    proof
        .iter()
        .enumerate()
        .map(|(j, step)| match step.side {
            Side::L => 1u64 << j,
            Side::R => 0,
        })
        .sum()
}

// ============================================================================
// Plain accumulator
// ============================================================================

/// Merkle tree accumulator over SHA-256.
#[derive(Clone, Default)]
pub struct MerkleAccumulator;

impl Accumulator for MerkleAccumulator {
    type Acc = MerkleTree;
    type Value = NodeHash;
    type Witness = MerkleProof;

    fn accumulate(&self, data: &[Vec<u8>]) -> MerkleTree {
        MerkleTree::from_data(data)
    }

    fn witgen(&self, acc: &MerkleTree, _data: &[Vec<u8>], index: usize) -> MerkleProof {
        acc.proof(index)
    }

    fn batch_witgen(&self, data: &[Vec<u8>]) -> Vec<MerkleProof> {
        let tree = MerkleTree::from_data(data);
        (0..data.len()).map(|i| tree.proof(i)).collect()
    }

    fn verify(&self, accval: &NodeHash, witness: &MerkleProof, x: &[u8]) -> bool {
        MerkleTree::check_proof(accval, x, witness)
    }

    fn get_accval(&self, acc: &MerkleTree) -> NodeHash {
        acc.root()
    }

    fn to_bytes(&self, accval: &NodeHash) -> Vec<u8> {
        accval.to_vec()
    }
}

// ============================================================================
// Sorted (universal) accumulator
// ============================================================================

/// Accumulation state of the sorted variant: the tree over sorted leaves
/// plus the permutation from caller indices to leaf positions.
pub struct SortedMerkleTree {
    tree: MerkleTree,
    position: Vec<usize>,
}

impl SortedMerkleTree {
    /// Leaf position of the caller's element `index`.
    pub fn position_of(&self, index: usize) -> usize {
        self.position[index]
    }
}

/// A proven neighbour inside a non-membership witness.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Neighbor {
    pub index: u64,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
    pub proof: MerkleProof,
}

/// Non-membership witness: the lexicographic neighbours of the absent
/// value, each with a membership proof. A missing side marks the tree
/// boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SortedNonMemWitness {
    pub left: Option<Neighbor>,
    pub right: Option<Neighbor>,
}

/// Merkle accumulator over byte-lexicographically sorted leaves.
///
/// Padding is applied before sorting, so the empty pad leaves sort to the
/// front and the leaf array is totally ordered — the property the
/// non-membership index arithmetic relies on.
#[derive(Clone, Default)]
pub struct SortedMerkleAccumulator;

impl Accumulator for SortedMerkleAccumulator {
    type Acc = SortedMerkleTree;
    type Value = NodeHash;
    type Witness = MerkleProof;

    fn accumulate(&self, data: &[Vec<u8>]) -> SortedMerkleTree {
        let mut padded = data.to_vec();
        let target = padded.len().max(1).next_power_of_two();
        padded.resize(target, Vec::new());

        let mut order: Vec<usize> = (0..padded.len()).collect();
        order.sort_by(|&i, &j| padded[i].cmp(&padded[j]).then(i.cmp(&j)));

        let sorted: Vec<Vec<u8>> = order.iter().map(|&i| padded[i].clone()).collect();
        let mut position = vec![0usize; padded.len()];
        for (leaf_pos, &orig) in order.iter().enumerate() {
            position[orig] = leaf_pos;
        }

        SortedMerkleTree {
            tree: MerkleTree::from_data(&sorted),
            position,
        }
    }

    fn witgen(&self, acc: &SortedMerkleTree, _data: &[Vec<u8>], index: usize) -> MerkleProof {
        acc.tree.proof(acc.position[index])
    }

    fn batch_witgen(&self, data: &[Vec<u8>]) -> Vec<MerkleProof> {
        let acc = self.accumulate(data);
        (0..data.len()).map(|i| acc.tree.proof(acc.position[i])).collect()
    }

    fn verify(&self, accval: &NodeHash, witness: &MerkleProof, x: &[u8]) -> bool {
        MerkleTree::check_proof(accval, x, witness)
    }

    fn get_accval(&self, acc: &SortedMerkleTree) -> NodeHash {
        acc.tree.root()
    }

    fn to_bytes(&self, accval: &NodeHash) -> Vec<u8> {
        accval.to_vec()
    }
}

impl UniversalAccumulator for SortedMerkleAccumulator {
    type NonMemWitness = SortedNonMemWitness;

    fn nonmemwitgen(
        &self,
        acc: &SortedMerkleTree,
        data: &[Vec<u8>],
        x: &[u8],
    ) -> Option<SortedNonMemWitness> {
        if data.iter().any(|d| d.as_slice() == x) {
            return None;
        }
        let leaves = acc.tree.leaves();
        let split = leaves.partition_point(|v| v.as_slice() < x);
        let neighbor = |pos: usize| Neighbor {
            index: pos as u64,
            value: leaves[pos].clone(),
            proof: acc.tree.proof(pos),
        };
        Some(SortedNonMemWitness {
            left: (split > 0).then(|| neighbor(split - 1)),
            right: (split < leaves.len()).then(|| neighbor(split)),
        })
    }

    fn nonmemverify(&self, accval: &NodeHash, witness: &SortedNonMemWitness, x: &[u8]) -> bool {
        let check = |n: &Neighbor| MerkleTree::check_proof(accval, &n.value, &n.proof);
        if witness.left.as_ref().is_some_and(|n| !check(n)) {
            return false;
        }
        if witness.right.as_ref().is_some_and(|n| !check(n)) {
            return false;
        }

        // Leaf indices recomputed from the proofs themselves; −1 marks a
        // missing side at the tree boundary.
        let li = witness
            .left
            .as_ref()
            .map(|n| leaf_index_of(&n.proof) as i64)
            .unwrap_or(-1);
        let ri = witness
            .right
            .as_ref()
            .map(|n| leaf_index_of(&n.proof) as i64)
            .unwrap_or(-1);

        let adjacent = li + 1 == ri
            || (li == -1 && ri == 0)
            || (ri == -1
                && witness
                    .left
                    .as_ref()
                    .is_some_and(|n| li + 1 == 1i64 << n.proof.len()));
        if !adjacent {
            return false;
        }

        let index_matched = witness.left.as_ref().map_or(true, |n| li == n.index as i64)
            && witness.right.as_ref().map_or(true, |n| ri == n.index as i64);
        if !index_matched {
            return false;
        }

        // The neighbours must actually bracket x.
        let left_ok = witness.left.as_ref().map_or(true, |n| n.value.as_slice() < x);
        let right_ok = witness.right.as_ref().map_or(true, |n| x < n.value.as_slice());
        left_ok && right_ok
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn data(items: &[&[u8]]) -> Vec<Vec<u8>> {
        items.iter().map(|x| x.to_vec()).collect()
    }

    #[test]
    fn membership_round_trip() {
        let acc = MerkleAccumulator;
        let xs = data(&[b"peko", b"peko2", b"peko3"]);
        let tree = acc.accumulate(&xs);
        let root = acc.get_accval(&tree);
        for (i, x) in xs.iter().enumerate() {
            let w = acc.witgen(&tree, &xs, i);
            assert!(acc.verify(&root, &w, x));
            assert!(!acc.verify(&root, &w, b"pekx"));
        }
        assert_eq!(acc.to_bytes(&root).len(), HASH_LEN);
    }

    #[test]
    fn batch_witnesses_match_individual_proofs() {
        let acc = MerkleAccumulator;
        let xs = data(&[b"1", b"2", b"3", b"4", b"5"]);
        let tree = acc.accumulate(&xs);
        let batch = acc.batch_witgen(&xs);
        assert_eq!(batch.len(), xs.len());
        for (i, w) in batch.iter().enumerate() {
            assert_eq!(*w, acc.witgen(&tree, &xs, i));
        }
    }

    #[test]
    fn padding_keeps_original_indices_valid() {
        let acc = MerkleAccumulator;
        let xs = data(&[b"a", b"b", b"c"]); // pads to 4 leaves
        let tree = acc.accumulate(&xs);
        assert_eq!(tree.leaf_count(), 4);
        let root = acc.get_accval(&tree);
        for (i, x) in xs.iter().enumerate() {
            assert!(acc.verify(&root, &acc.witgen(&tree, &xs, i), x));
        }
    }

    #[test]
    fn domain_separation_distinguishes_leaf_and_node() {
        // Present the two leaf hashes of [x, y] as a single leaf. Without
        // the 0x00/0x01 prefixes both trees would share a root.
        let xs = data(&[b"x", b"y"]);
        let two_leaves = MerkleTree::from_data(&xs);
        let mut forged_leaf = hash_leaf(b"x").to_vec();
        forged_leaf.extend_from_slice(&hash_leaf(b"y"));
        let one_leaf = MerkleTree::from_data(&[forged_leaf]);
        assert_ne!(two_leaves.root(), one_leaf.root());
    }

    #[test]
    fn from_parts_checks_consistency() {
        let xs = data(&[b"a", b"b"]);
        let tree = MerkleTree::from_data(&xs);
        let rebuilt = MerkleTree::from_parts(tree.nodes.clone(), tree.data.clone());
        assert_eq!(rebuilt.root(), tree.root());
        assert!(rebuilt.check_present(0, b"a"));
        assert!(!rebuilt.check_present(1, b"a"));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn from_parts_rejects_bad_length() {
        let xs = data(&[b"a", b"b", b"c"]);
        let tree = MerkleTree::from_data(&data(&[b"a", b"b", b"c", b""]));
        MerkleTree::from_parts(tree.nodes.clone(), xs);
    }

    #[test]
    fn sorted_membership_uses_permuted_positions() {
        let acc = SortedMerkleAccumulator;
        let xs = data(&[b"5", b"2", b"3", b"1"]);
        let tree = acc.accumulate(&xs);
        let root = acc.get_accval(&tree);
        for (i, x) in xs.iter().enumerate() {
            let w = acc.witgen(&tree, &xs, i);
            assert!(acc.verify(&root, &w, x));
        }
    }

    #[test]
    fn sorted_nonmembership_accepts_absent_values() {
        let acc = SortedMerkleAccumulator;
        let xs = data(&[b"5", b"2", b"3", b"1"]);
        let tree = acc.accumulate(&xs);
        let root = acc.get_accval(&tree);
        for absent in [&b"0"[..], b"4", b"6"] {
            let w = acc.nonmemwitgen(&tree, &xs, absent).expect("absent");
            assert!(acc.nonmemverify(&root, &w, absent), "{absent:?}");
        }
        // Members get no witness at all.
        assert!(acc.nonmemwitgen(&tree, &xs, b"3").is_none());
    }

    #[test]
    fn sorted_nonmembership_with_padding() {
        let acc = SortedMerkleAccumulator;
        let xs = data(&[b"5", b"2", b"3"]); // pads to 4, pad leaf sorts first
        let tree = acc.accumulate(&xs);
        let root = acc.get_accval(&tree);
        let w = acc.nonmemwitgen(&tree, &xs, b"1").expect("absent");
        assert!(acc.nonmemverify(&root, &w, b"1"));
        let w = acc.nonmemwitgen(&tree, &xs, b"9").expect("absent");
        assert!(acc.nonmemverify(&root, &w, b"9"));
    }

    #[test]
    fn sorted_nonmembership_rejects_forgeries() {
        let acc = SortedMerkleAccumulator;
        let xs = data(&[b"5", b"2", b"3", b"1"]);
        let tree = acc.accumulate(&xs);
        let root = acc.get_accval(&tree);

        // A witness for one gap does not prove a different (present) value.
        let w = acc.nonmemwitgen(&tree, &xs, b"4").expect("absent");
        assert!(!acc.nonmemverify(&root, &w, b"3"));

        // Tampering a neighbour value breaks its membership proof.
        let mut tampered = acc.nonmemwitgen(&tree, &xs, b"4").expect("absent");
        if let Some(n) = tampered.left.as_mut() {
            n.value = b"0".to_vec();
        }
        assert!(!acc.nonmemverify(&root, &tampered, b"4"));

        // Non-adjacent neighbours are rejected even with valid proofs.
        let far = SortedNonMemWitness {
            left: Some(Neighbor {
                index: 0,
                value: b"1".to_vec(),
                proof: tree.tree.proof(0),
            }),
            right: Some(Neighbor {
                index: 3,
                value: b"5".to_vec(),
                proof: tree.tree.proof(3),
            }),
        };
        assert!(!acc.nonmemverify(&root, &far, b"4"));
    }

    #[test]
    fn proof_steps_serialize_sides_as_strings() {
        let step = ProofStep {
            side: Side::L,
            sibling: vec![1, 2, 3],
        };
        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains("\"L\""));
        let back: ProofStep = serde_json::from_str(&json).unwrap();
        assert_eq!(back, step);
    }
}

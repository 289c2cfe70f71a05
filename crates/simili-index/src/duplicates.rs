//! Near-duplicate grouping and scoring.
//!
//! Chunks are nodes, pairs at or above the threshold are edges, and groups are
//! the connected components of that graph. Raising the threshold removes edges,
//! so groups can only shrink or split.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::chunker::ChunkKind;
use crate::metadata_store::{MetadataStore, StoredChunk};
use crate::vector_store::{VectorIndex, cosine_similarity};

/// Weight of the size ratio in `duplicate_score`.
const SIZE_RATIO_WEIGHT: f32 = 0.25;

#[derive(Debug, Clone)]
pub struct DuplicateOptions {
    /// Minimum cosine similarity for two chunks to be linked.
    pub threshold: f32,
    /// Groups smaller than this are dropped. Values below 2 act as 2.
    pub min_group_size: usize,
    /// Only consider chunks of this kind.
    pub kind: Option<ChunkKind>,
}

impl Default for DuplicateOptions {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            min_group_size: 2,
            kind: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMember {
    pub id: String,
    pub name: Option<String>,
    pub kind: ChunkKind,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text_len: usize,
}

impl From<&StoredChunk> for GroupMember {
    fn from(chunk: &StoredChunk) -> Self {
        Self {
            id: chunk.id.clone(),
            name: chunk.name.clone(),
            kind: chunk.kind,
            file_path: chunk.file_path.clone(),
            start_line: chunk.span.start_line,
            end_line: chunk.span.end_line,
            text_len: chunk.text_len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    /// 1-based, in order of each group's first member in the metadata store.
    pub id: usize,
    /// Most frequent member kind.
    pub kind: ChunkKind,
    pub members: Vec<GroupMember>,
    /// Mean pairwise cosine similarity.
    pub avg_similarity: f32,
    /// Shortest member text length over the longest.
    pub size_ratio: f32,
    /// Ranking score; favors high similarity and similar sizes.
    pub duplicate_score: f32,
}

/// Group near-duplicate chunks and rank the groups by `duplicate_score`,
/// ties broken by group id.
///
/// Groups are connected components, so a higher threshold only splits or
/// shrinks them. The number of groups can still rise when a chain splits
/// into two parts that both keep at least `min_group_size` members.
#[must_use]
pub fn find_duplicate_groups(
    metadata: &MetadataStore,
    vectors: &dyn VectorIndex,
    options: &DuplicateOptions,
) -> Vec<DuplicateGroup> {
    let candidates: Vec<(&StoredChunk, &[f32])> = metadata
        .iter()
        .filter(|c| options.kind.is_none_or(|k| c.kind == k))
        .filter_map(|c| vectors.get(&c.id).map(|v| (c, v)))
        .collect();
    let position: HashMap<&str, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, (c, _))| (c.id.as_str(), i))
        .collect();

    let mut sets = UnionFind::new(candidates.len());
    for (i, (_, vector)) in candidates.iter().enumerate() {
        for hit in vectors.query(vector, usize::MAX, options.threshold) {
            if let Some(&j) = position.get(hit.id.as_str())
                && j != i
            {
                sets.union(i, j);
            }
        }
    }

    let mut components: Vec<Vec<usize>> = Vec::new();
    let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
    for i in 0..candidates.len() {
        let root = sets.find(i);
        let slot = *slot_of_root.entry(root).or_insert_with(|| {
            components.push(Vec::new());
            components.len() - 1
        });
        components[slot].push(i);
    }

    let min_size = options.min_group_size.max(2);
    let mut groups: Vec<DuplicateGroup> = components
        .into_iter()
        .filter(|members| members.len() >= min_size)
        .enumerate()
        .map(|(n, members)| {
            let members: Vec<(&StoredChunk, &[f32])> =
                members.into_iter().map(|i| candidates[i]).collect();
            score_group(n + 1, &members)
        })
        .collect();

    groups.sort_by(|a, b| {
        b.duplicate_score
            .total_cmp(&a.duplicate_score)
            .then_with(|| a.id.cmp(&b.id))
    });
    tracing::debug!(
        groups = groups.len(),
        threshold = options.threshold,
        "duplicate groups found"
    );
    groups
}

fn score_group(id: usize, members: &[(&StoredChunk, &[f32])]) -> DuplicateGroup {
    let mut total = 0.0_f64;
    let mut pairs = 0_u32;
    for (i, (_, a)) in members.iter().enumerate() {
        for (_, b) in &members[i + 1..] {
            total += f64::from(cosine_similarity(a, b));
            pairs += 1;
        }
    }
    #[expect(clippy::cast_possible_truncation)]
    let avg_similarity = if pairs == 0 {
        0.0
    } else {
        (total / f64::from(pairs)) as f32
    };

    let lengths: Vec<usize> = members.iter().map(|(c, _)| c.text_len()).collect();
    let shortest = lengths.iter().copied().min().unwrap_or(0);
    let longest = lengths.iter().copied().max().unwrap_or(0);
    #[expect(clippy::cast_precision_loss)]
    let size_ratio = if longest == 0 {
        1.0
    } else {
        shortest as f32 / longest as f32
    };

    DuplicateGroup {
        id,
        kind: dominant_kind(members.iter().map(|(c, _)| c.kind)),
        members: members.iter().map(|(c, _)| GroupMember::from(*c)).collect(),
        avg_similarity,
        size_ratio,
        duplicate_score: avg_similarity * (1.0 - SIZE_RATIO_WEIGHT + SIZE_RATIO_WEIGHT * size_ratio),
    }
}

/// Most frequent kind; ties go to the kind declared first.
fn dominant_kind(kinds: impl Iterator<Item = ChunkKind>) -> ChunkKind {
    let mut counts: BTreeMap<ChunkKind, usize> = BTreeMap::new();
    for kind in kinds {
        *counts.entry(kind).or_default() += 1;
    }
    let mut best = (ChunkKind::Other, 0);
    for (kind, count) in counts {
        if count > best.1 {
            best = (kind, count);
        }
    }
    best.0
}

/// Disjoint sets over `0..n` with path halving and union by size.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut a, mut b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        if self.size[a] < self.size[b] {
            std::mem::swap(&mut a, &mut b);
        }
        self.parent[b] = a;
        self.size[a] += self.size[b];
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::chunker::{ChunkFacts, Span};
    use crate::languages::Lang;
    use crate::vector_store::FlatVectorStore;

    fn stored(id: &str, kind: ChunkKind, text_len: usize) -> StoredChunk {
        StoredChunk {
            id: id.to_owned(),
            kind,
            name: Some(id.to_owned()),
            file_path: format!("{id}.ts"),
            language: Lang::TypeScript,
            scope: String::new(),
            span: Span {
                start_line: 1,
                start_column: 1,
                end_line: 5,
                end_column: 1,
            },
            content_hash: id.to_owned(),
            text: "x".repeat(text_len),
            facts: ChunkFacts::default(),
        }
    }

    fn build(entries: &[(&str, ChunkKind, usize, Vec<f32>)]) -> (MetadataStore, FlatVectorStore) {
        let mut metadata = MetadataStore::new();
        let mut vectors = FlatVectorStore::new();
        for (id, kind, len, vector) in entries {
            metadata.set(stored(id, *kind, *len));
            vectors.upsert(id, vector.clone()).unwrap();
        }
        (metadata, vectors)
    }

    fn ids(group: &DuplicateGroup) -> Vec<&str> {
        group.members.iter().map(|m| m.id.as_str()).collect()
    }

    fn opts(threshold: f32) -> DuplicateOptions {
        DuplicateOptions {
            threshold,
            ..DuplicateOptions::default()
        }
    }

    #[test]
    fn transitive_chains_form_one_group() {
        // a~b and b~c at 0.8, but a and c are further apart.
        let (m, v) = build(&[
            ("a", ChunkKind::Function, 100, vec![1.0, 0.0, 0.0]),
            ("b", ChunkKind::Function, 100, vec![0.9, 0.43, 0.0]),
            ("c", ChunkKind::Function, 100, vec![0.6, 0.8, 0.0]),
            ("d", ChunkKind::Function, 100, vec![0.0, 0.0, 1.0]),
        ]);
        assert!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.6, 0.8, 0.0]) < 0.8);
        let groups = find_duplicate_groups(&m, &v, &opts(0.8));
        assert_eq!(groups.len(), 1);
        assert_eq!(ids(&groups[0]), vec!["a", "b", "c"]);
    }

    #[test]
    fn raising_threshold_can_split_a_chain_into_two_groups() {
        let at = |degrees: f32| {
            let r = degrees.to_radians();
            vec![r.cos(), r.sin()]
        };
        // Neighbours a~b and c~d at about 0.99, the b~c link at about 0.9.
        let (m, v) = build(&[
            ("a", ChunkKind::Function, 100, at(0.0)),
            ("b", ChunkKind::Function, 100, at(8.0)),
            ("c", ChunkKind::Function, 100, at(33.0)),
            ("d", ChunkKind::Function, 100, at(41.0)),
        ]);

        let loose = find_duplicate_groups(&m, &v, &opts(0.85));
        assert_eq!(loose.len(), 1);
        assert_eq!(ids(&loose[0]), vec!["a", "b", "c", "d"]);

        let strict = find_duplicate_groups(&m, &v, &opts(0.95));
        assert_eq!(strict.len(), 2);
        let mut split: Vec<Vec<&str>> = strict.iter().map(ids).collect();
        split.sort();
        assert_eq!(split, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn singletons_are_dropped_and_min_size_applies() {
        let (m, v) = build(&[
            ("a", ChunkKind::Function, 100, vec![1.0, 0.0]),
            ("b", ChunkKind::Function, 100, vec![1.0, 0.01]),
            ("c", ChunkKind::Function, 100, vec![0.0, 1.0]),
        ]);
        assert_eq!(find_duplicate_groups(&m, &v, &opts(0.9)).len(), 1);
        let three = DuplicateOptions {
            min_group_size: 3,
            ..opts(0.9)
        };
        assert!(find_duplicate_groups(&m, &v, &three).is_empty());
        let one = DuplicateOptions {
            min_group_size: 1,
            ..opts(0.9)
        };
        assert_eq!(find_duplicate_groups(&m, &v, &one).len(), 1);
    }

    #[test]
    fn kind_filter_restricts_members() {
        let (m, v) = build(&[
            ("a", ChunkKind::Component, 100, vec![1.0, 0.0]),
            ("b", ChunkKind::Function, 100, vec![1.0, 0.0]),
            ("c", ChunkKind::Component, 100, vec![1.0, 0.0]),
        ]);
        let filtered = DuplicateOptions {
            kind: Some(ChunkKind::Component),
            ..opts(0.9)
        };
        let groups = find_duplicate_groups(&m, &v, &filtered);
        assert_eq!(groups.len(), 1);
        assert_eq!(ids(&groups[0]), vec!["a", "c"]);
        assert_eq!(groups[0].kind, ChunkKind::Component);
    }

    #[test]
    fn scores_and_ordering() {
        let (m, v) = build(&[
            ("stub", ChunkKind::Function, 20, vec![1.0, 0.0, 0.0]),
            ("full", ChunkKind::Function, 200, vec![1.0, 0.0, 0.0]),
            ("x", ChunkKind::Hook, 100, vec![0.0, 1.0, 0.0]),
            ("y", ChunkKind::Hook, 100, vec![0.0, 1.0, 0.0]),
        ]);
        let groups = find_duplicate_groups(&m, &v, &opts(0.9));
        assert_eq!(groups.len(), 2);

        // Equal similarity, but the hook pair has matching sizes.
        assert_eq!(ids(&groups[0]), vec!["x", "y"]);
        assert_eq!(groups[0].id, 2);
        assert!((groups[0].size_ratio - 1.0).abs() < 1e-6);
        assert!((groups[0].duplicate_score - 1.0).abs() < 1e-6);
        assert_eq!(groups[0].kind, ChunkKind::Hook);

        assert_eq!(groups[1].id, 1);
        assert!((groups[1].size_ratio - 0.1).abs() < 1e-6);
        assert!((groups[1].avg_similarity - 1.0).abs() < 1e-6);
        assert!((groups[1].duplicate_score - 0.775).abs() < 1e-6);
    }

    #[test]
    fn equal_scores_tie_break_by_group_id() {
        let (m, v) = build(&[
            ("a", ChunkKind::Function, 50, vec![1.0, 0.0]),
            ("b", ChunkKind::Function, 50, vec![0.0, 1.0]),
            ("c", ChunkKind::Function, 50, vec![1.0, 0.0]),
            ("d", ChunkKind::Function, 50, vec![0.0, 1.0]),
        ]);
        let groups = find_duplicate_groups(&m, &v, &opts(0.9));
        assert_eq!(groups.iter().map(|g| g.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(ids(&groups[0]), vec!["a", "c"]);
    }

    #[test]
    fn dominant_kind_prefers_declaration_order_on_ties() {
        let kinds = [ChunkKind::Function, ChunkKind::Component];
        assert_eq!(dominant_kind(kinds.into_iter()), ChunkKind::Component);
        let kinds = [ChunkKind::Function, ChunkKind::Function, ChunkKind::Hook];
        assert_eq!(dominant_kind(kinds.into_iter()), ChunkKind::Function);
    }

    #[test]
    fn union_find_merges() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(3, 4);
        uf.union(1, 4);
        assert_eq!(uf.find(0), uf.find(3));
        assert_ne!(uf.find(0), uf.find(2));
    }

    fn arb_vectors() -> impl Strategy<Value = Vec<Vec<f32>>> {
        prop::collection::vec(prop::collection::vec(-1.0_f32..1.0, 3), 2..10)
    }

    proptest! {
        #[test]
        fn raising_threshold_only_refines_groups(
            raw in arb_vectors(),
            low in 0.0_f32..0.9,
            delta in 0.01_f32..0.1,
        ) {
            let entries: Vec<(String, Vec<f32>)> = raw
                .into_iter()
                .enumerate()
                .map(|(i, v)| (format!("c{i:02}"), v))
                .collect();
            let mut metadata = MetadataStore::new();
            let mut vectors = FlatVectorStore::new();
            for (id, v) in &entries {
                metadata.set(stored(id, ChunkKind::Function, 60));
                vectors.upsert(id, v.clone()).unwrap();
            }

            let loose = find_duplicate_groups(&metadata, &vectors, &opts(low));
            let strict = find_duplicate_groups(&metadata, &vectors, &opts(low + delta));

            let loose_members: usize = loose.iter().map(|g| g.members.len()).sum();
            let strict_members: usize = strict.iter().map(|g| g.members.len()).sum();
            prop_assert!(strict_members <= loose_members);

            for group in &strict {
                let members = ids(group);
                let home = loose.iter().find(|g| ids(g).contains(&members[0]));
                prop_assert!(home.is_some());
                let home = ids(home.unwrap());
                prop_assert!(members.iter().all(|m| home.contains(m)));
            }
        }
    }
}

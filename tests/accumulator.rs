use merlin::Transcript;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use utreexo::{
    utreexo_hasher, Accumulator, BatchProof, Config, Forest, Hash, Hasher, Leaf, MerkleItem,
    Pollard, UtreexoError,
};

struct Item(u64);

impl MerkleItem for Item {
    fn commit(&self, t: &mut Transcript) {
        t.append_u64(b"test_item", self.0);
    }
}

fn random_leaves(
    rng: &mut StdRng,
    hasher: &Hasher<Item>,
    next: &mut u64,
    count: usize,
) -> Vec<Leaf> {
    (0..count)
        .map(|_| {
            *next += 1;
            Leaf {
                hash: hasher.leaf(&Item(*next)),
                remember: rng.gen_bool(0.5),
            }
        })
        .collect()
}

#[test]
fn random_modifications_keep_representations_in_sync() {
    let mut rng = StdRng::seed_from_u64(7);
    let hasher = utreexo_hasher::<Item>();
    let mut forest = Forest::new(hasher.clone());
    let mut pollard = Pollard::new(hasher.clone(), Config::recommended_max_nodes(2000));
    let mut next = 0u64;

    for round in 0..60 {
        let n = forest.num_leaves();
        let k = rng.gen_range(0, n.min(6) + 1) as usize;
        let mut deletions: Vec<u64> = rand::seq::index::sample(&mut rng, n as usize, k)
            .into_iter()
            .map(|i| i as u64)
            .collect();
        deletions.sort();

        // the pruned forest needs a proof of what it deletes
        let deleted: Vec<Hash> = deletions
            .iter()
            .map(|&p| forest.leaf(p).expect("position is in range"))
            .collect();
        let proof = forest.prove(&deleted).unwrap();
        assert_eq!(proof.targets(), &deletions[..]);
        let proof = BatchProof::from_bytes(&proof.to_bytes()).unwrap();
        pollard.verify(&proof, &deleted).unwrap();

        let count = rng.gen_range(0, 24);
        let additions = random_leaves(&mut rng, &hasher, &mut next, count);
        forest.modify(&additions, &deletions).unwrap();
        pollard.modify(&additions, &deletions).unwrap();

        assert_eq!(pollard.num_leaves(), forest.num_leaves());
        assert_eq!(pollard.roots(), forest.roots());
        assert_eq!(
            forest.roots().len(),
            forest.num_leaves().count_ones() as usize
        );
        for h in deleted.iter() {
            assert!(!forest.contains(h));
        }

        if round % 10 == 9 {
            pollard.prune();
            assert_eq!(pollard.pool_len(), pollard.roots().len());
        }
    }
}

#[test]
fn random_batch_proofs() {
    let mut rng = StdRng::seed_from_u64(11);
    let hasher = utreexo_hasher::<Item>();
    let mut next = 0u64;
    let leaves = random_leaves(&mut rng, &hasher, &mut next, 100);
    let mut forest = Forest::new(hasher.clone());
    forest.modify(&leaves, &[]).unwrap();

    for _ in 0..20 {
        let k = rng.gen_range(1, 10);
        let mut positions: Vec<u64> = rand::seq::index::sample(&mut rng, 100, k)
            .into_iter()
            .map(|i| i as u64)
            .collect();
        positions.sort();
        let targets: Vec<Hash> = positions
            .iter()
            .map(|&p| forest.leaf(p).unwrap())
            .collect();

        let proof = forest.prove(&targets).unwrap();
        assert_eq!(forest.verify(&proof, &targets), Ok(()));

        let mut pollard = Pollard::new(hasher.clone(), 512);
        pollard.modify(&leaves, &[]).unwrap();
        pollard.prune();
        assert_eq!(pollard.verify(&proof, &targets), Ok(()));

        if proof.hashes().is_empty() {
            continue;
        }
        // corrupting a byte of a hash breaks the proof
        let mut bytes = proof.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 1;
        let corrupted = BatchProof::from_bytes(&bytes).unwrap();
        let mut fresh = Pollard::new(hasher.clone(), 512);
        fresh.modify(&leaves, &[]).unwrap();
        fresh.prune();
        assert_eq!(
            fresh.verify(&corrupted, &targets),
            Err(UtreexoError::InvalidProof)
        );
    }
}

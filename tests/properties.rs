use pmi::coder::{Coder, NameCoder};
use pmi::ids::ObjectIdPool;
use pmi::message::{Communicator, ThreadCommunicator};
use pmi::ObjectId;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::thread;

proptest! {
    #[test]
    fn pool_always_hands_out_the_smallest_free_id(ops in prop::collection::vec(any::<Option<prop::sample::Index>>(), 1..200)) {
        let mut pool = ObjectIdPool::new();
        let mut live = BTreeSet::new();

        for op in ops {
            match op {
                // Some(index) frees a live id, if there is one
                Some(index) if !live.is_empty() => {
                    let id = *index.get(&live.iter().copied().collect::<Vec<u32>>());
                    pool.free(ObjectId(id)).unwrap();
                    live.remove(&id);
                }
                _ => {
                    let expected = (0..).find(|id| !live.contains(id)).unwrap();
                    let id = pool.allocate();
                    prop_assert_eq!(id, ObjectId(expected));
                    live.insert(id.0);
                }
            }
            prop_assert_eq!(pool.live_count(), live.len());
        }
        for id in 0..pool.high_water() {
            prop_assert_eq!(pool.is_live(ObjectId(id)), live.contains(&id));
        }
    }

    #[test]
    fn names_survive_a_broadcast(name in "[A-Za-z_][A-Za-z0-9_:]{0,40}", size in 1usize..6, root_seed in any::<usize>()) {
        let root = root_seed % size;
        let expected_len = NameCoder::encoded_len(&name);
        let handles: Vec<_> = ThreadCommunicator::world(size)
            .into_iter()
            .map(|comm| {
                let name = name.clone();
                thread::spawn(move || {
                    let coder = NameCoder::new(expected_len);
                    let message = (comm.rank() == root).then(|| coder.encode(name));
                    let data = comm.broadcast(root, message).unwrap();
                    coder.decode(data).unwrap()
                })
            })
            .collect();
        for handle in handles {
            prop_assert_eq!(&handle.join().unwrap(), &name);
        }
    }

    #[test]
    fn names_with_the_wrong_length_are_rejected(name in "[a-z]{1,20}", delta in 1u32..4) {
        let coder = NameCoder::new(NameCoder::encoded_len(&name) + delta);
        prop_assert!(coder.decode(NameCoder::new(0).encode(name)).is_err());
    }
}

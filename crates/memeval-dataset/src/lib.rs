mod align;
mod loader;
mod normalize;

pub use align::align_turn_pairs;
pub use loader::load_dataset_jsonl;
pub use normalize::{classify_validity, normalize_record};

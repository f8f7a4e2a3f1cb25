pub mod beacon_block;
pub mod beacon_block_body;
pub mod beacon_state;
pub mod block_processing;
pub mod epoch_processing;

mod sessions;
mod sync_state;

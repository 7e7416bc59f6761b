mod coordination;
mod helpers;
mod indexing;
mod watcher;

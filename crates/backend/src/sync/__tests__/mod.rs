pub mod helpers;
mod upstream;

mod coherency;
mod helpers;
mod resolution;

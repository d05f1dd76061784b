pub mod bigram;
pub mod corrector;

//! End-to-end tests for the TIM-VX kernel layer live in `tests/`.

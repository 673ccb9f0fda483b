mod reserve;
mod support;

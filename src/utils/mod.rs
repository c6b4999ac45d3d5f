pub mod random;
#[cfg(test)]
pub mod test_utils;
pub mod url;

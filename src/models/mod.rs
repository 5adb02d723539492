// Data models for the bookshelf API

pub mod auth;
pub mod book;

pub use auth::{AuthRequest, AuthResponse, Claims};
pub use book::{page_count, Book, BookSearchResponse, PagedReadBooks, ReadBook};

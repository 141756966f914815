mod client;
mod oauth;
mod token;

pub use client::{
    ApiErrorClass, CSV_MIME, ContentStream, DEFAULT_BASE_URL, DriveClient, DriveError, DriveFile,
    FOLDER_MIME, FileList, SPREADSHEET_MIME,
};
pub use oauth::{OAuthClient, OAuthError, OAuthToken};
pub use token::{TokenError, TokenProvider};

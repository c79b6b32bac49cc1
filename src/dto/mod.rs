pub mod tramite_dto;
